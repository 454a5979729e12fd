//! Gateway connection supervisor.
//!
//! One supervisor task runs per `connect` call. It owns the socket session and
//! the reconnect backoff, forwards outbound packets while connected, and turns
//! everything it sees into [`TransportEvent`]s for the client actor. Events
//! carry the generation they were spawned with so the actor can ignore a
//! supervisor that has since been replaced or shut down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use overlay_chat_protocol::events::{GET_PRESENCE, JOIN, NEW_MESSAGE, SESSION_ENDED};
use overlay_chat_protocol::{
    decode_message, decode_presence, is_presence_event, Assembled, EventPayload, ImageSource,
    InboundMessage, Presence, SocketPacket, WireMessage,
};

use crate::backoff::Backoff;
use crate::config::ReconnectConfig;
use crate::error::GatewayError;
use crate::image_store::{materialize_message, ImageStore};
use crate::session::{SessionEnd, SocketSession};
use crate::transport::Connector;

/// Upper bound on the goodbye handshake when shutting down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug)]
pub(crate) enum TransportEventKind {
    Connected,
    Disconnected { reason: String },
    Error(String),
    Reconnecting { attempt: u32 },
    /// The reconnect budget is spent; the supervisor has exited.
    GaveUp,
    Presence(Presence),
    Message(InboundMessage),
    SessionEnded,
}

/// Everything a supervisor needs, fixed for its lifetime.
pub(crate) struct Supervisor {
    pub connector: Arc<dyn Connector>,
    pub store: Arc<dyn ImageStore>,
    pub url: Url,
    pub token: String,
    pub reconnect: ReconnectConfig,
    pub generation: u64,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Owner's side of a running supervisor.
pub(crate) struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Assembled>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Queue a packet for the live session. Packets queued while no session
    /// is up are discarded when the next one starts.
    pub fn emit(&self, packet: Assembled) {
        if self.outbound.send(packet).is_err() {
            tracing::debug!("connection supervisor gone, dropping outbound packet");
        }
    }

    /// Ask the supervisor to leave gracefully. The task is left to finish
    /// its goodbye on its own.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        // a dropped handle without shutdown() still stops the supervisor
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

pub(crate) fn spawn_supervisor(supervisor: Supervisor) -> ConnectionHandle {
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(supervisor.supervise(outbound_rx, shutdown_rx));
    ConnectionHandle {
        outbound,
        shutdown: Some(shutdown),
        task,
    }
}

impl Supervisor {
    /// Run the reconnect loop, restarting it after a panic so the client is
    /// always told the connection is gone.
    async fn supervise(
        self,
        mut outbound_rx: mpsc::UnboundedReceiver<Assembled>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut backoff = Backoff::new(self.reconnect.clone());

        loop {
            let run = AssertUnwindSafe(self.run(&mut backoff, &mut outbound_rx, &mut shutdown_rx));
            let Err(panic) = run.catch_unwind().await else {
                return;
            };

            let detail = panic_detail(&*panic);
            tracing::error!(%detail, "connection supervisor panicked");
            self.report(TransportEventKind::Error(format!(
                "connection task failed: {detail}"
            )));

            if !self.wait_to_retry(&mut backoff, &mut shutdown_rx).await {
                return;
            }
        }
    }

    async fn run(
        &self,
        backoff: &mut Backoff,
        outbound_rx: &mut mpsc::UnboundedReceiver<Assembled>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) {
        loop {
            let established = tokio::select! {
                biased;
                _ = &mut *shutdown_rx => return,
                result = SocketSession::establish(self.connector.as_ref(), &self.url, &self.token) => result,
            };

            match established {
                Ok(mut session) => {
                    backoff.reset();
                    discard_offline_packets(outbound_rx);
                    tracing::info!(sid = %session.sid(), "connected to chat gateway");

                    let end = match self.announce(&mut session).await {
                        Ok(()) => {
                            self.report(TransportEventKind::Connected);
                            self.drive(&mut session, outbound_rx, shutdown_rx).await
                        }
                        Err(end) => Some(end),
                    };

                    match end {
                        None => {
                            let _ = tokio::time::timeout(CLOSE_TIMEOUT, session.disconnect()).await;
                            tracing::info!("disconnected from chat gateway");
                            return;
                        }
                        Some(SessionEnd::Disconnected(reason)) => {
                            tracing::warn!(%reason, "chat gateway session ended");
                            self.report(TransportEventKind::Disconnected { reason });
                        }
                        Some(SessionEnd::Failed(e)) => {
                            tracing::warn!(error = %e, "chat gateway session failed");
                            self.report(TransportEventKind::Error(e.to_string()));
                        }
                    }
                }
                Err(GatewayError::HandshakeRejected(reason)) => {
                    tracing::warn!(%reason, "chat gateway rejected handshake");
                    self.report(TransportEventKind::Disconnected {
                        reason: format!("connect error: {reason}"),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, url = %self.url, "chat gateway connect failed");
                    self.report(TransportEventKind::Error(e.to_string()));
                }
            }

            if !self.wait_to_retry(backoff, shutdown_rx).await {
                return;
            }
        }
    }

    /// Sleep out the next backoff delay. `false` when the budget is spent or
    /// shutdown was requested.
    async fn wait_to_retry(
        &self,
        backoff: &mut Backoff,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> bool {
        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(attempts = backoff.attempts(), "giving up on chat gateway");
            self.report(TransportEventKind::GaveUp);
            return false;
        };
        tracing::debug!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "reconnecting to chat gateway"
        );
        self.report(TransportEventKind::Reconnecting {
            attempt: backoff.attempts(),
        });

        tokio::select! {
            biased;
            _ = &mut *shutdown_rx => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Join the room and ask for a presence snapshot.
    async fn announce(&self, session: &mut SocketSession) -> Result<(), SessionEnd> {
        for name in [JOIN, GET_PRESENCE] {
            let packet = Assembled {
                packet: SocketPacket::event(name, Vec::new()),
                attachments: Vec::new(),
            };
            session
                .emit(packet)
                .await
                .map_err(|e| SessionEnd::from(GatewayError::from(e)))?;
        }
        Ok(())
    }

    /// Pump the live session. Returns `None` when shutdown was requested.
    async fn drive(
        &self,
        session: &mut SocketSession,
        outbound_rx: &mut mpsc::UnboundedReceiver<Assembled>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> Option<SessionEnd> {
        loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown_rx => return None,
                Some(packet) = outbound_rx.recv() => {
                    if let Err(e) = session.emit(packet).await {
                        return Some(GatewayError::from(e).into());
                    }
                }
                frame = session.recv_frame() => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(end) => return Some(end),
                    };
                    match session.handle_frame(frame).await {
                        Ok(Some(event)) => self.dispatch(event).await,
                        Ok(None) => {}
                        Err(end) => return Some(end),
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: EventPayload) {
        match event.name.as_str() {
            name if is_presence_event(name) => {
                let presence = decode_presence(event.first_arg());
                tracing::debug!(
                    count = presence.participant_count,
                    remaining_ms = presence.remaining_ms,
                    "presence update"
                );
                self.report(TransportEventKind::Presence(presence));
            }
            NEW_MESSAGE => match decode_message(&event) {
                Ok(wire) => {
                    if let Some(message) = self.materialize(wire).await {
                        self.report(TransportEventKind::Message(message));
                    }
                }
                Err(e) => tracing::debug!(error = %e, "dropping malformed message"),
            },
            SESSION_ENDED => self.report(TransportEventKind::SessionEnded),
            other => tracing::trace!(event = other, "ignoring event"),
        }
    }

    /// File writes go to the blocking pool; everything else is immediate.
    async fn materialize(&self, wire: WireMessage) -> Option<InboundMessage> {
        let needs_disk = matches!(
            &wire,
            WireMessage::Image {
                source: Some(ImageSource::Embedded { .. }),
                ..
            }
        );
        if !needs_disk {
            return materialize_message(wire, self.store.as_ref());
        }

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || materialize_message(wire, store.as_ref())).await {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "image materialisation task failed");
                None
            }
        }
    }

    fn report(&self, kind: TransportEventKind) {
        let event = TransportEvent {
            generation: self.generation,
            kind,
        };
        if self.events.send(event).is_err() {
            tracing::debug!("gateway client gone, dropping transport event");
        }
    }
}

fn panic_detail(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

fn discard_offline_packets(outbound_rx: &mut mpsc::UnboundedReceiver<Assembled>) {
    let mut dropped = 0usize;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(dropped, "discarded packets queued while offline");
    }
}
