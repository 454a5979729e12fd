//! One Socket.IO session over a transport.
//!
//! Handles the Engine.IO open packet, the credentialed CONNECT handshake,
//! ping/pong liveness and binary attachment reassembly, and hands decoded
//! events to the connection supervisor.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use url::Url;

use overlay_chat_protocol::{
    Assembled, BinaryAssembler, EnginePacket, EventPayload, OpenInfo, SocketPacket,
    SocketPacketKind,
};
use overlay_chat_protocol::packet::ROOT_NAMESPACE;

use crate::error::GatewayError;
use crate::transport::{Connector, Frame, Transport, TransportError};

// Disconnect reasons, worded the way Socket.IO reports them
pub const REASON_SERVER_DISCONNECT: &str = "io server disconnect";
pub const REASON_TRANSPORT_CLOSE: &str = "transport close";
pub const REASON_PING_TIMEOUT: &str = "ping timeout";

/// How a live session came to an end.
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// Orderly or liveness-related end, with a Socket.IO style reason.
    Disconnected(String),
    /// Transport or protocol failure.
    Failed(GatewayError),
}

impl From<GatewayError> for SessionEnd {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::PingTimeout => SessionEnd::Disconnected(REASON_PING_TIMEOUT.to_string()),
            GatewayError::Transport(TransportError::Closed) => {
                SessionEnd::Disconnected(REASON_TRANSPORT_CLOSE.to_string())
            }
            other => SessionEnd::Failed(other),
        }
    }
}

pub(crate) struct SocketSession {
    transport: Box<dyn Transport>,
    open: OpenInfo,
    assembler: BinaryAssembler,
    deadline: Instant,
}

impl SocketSession {
    /// Connect, wait for the Engine.IO open packet and perform the CONNECT
    /// handshake with `token` as auth payload.
    pub async fn establish(
        connector: &dyn Connector,
        url: &Url,
        token: &str,
    ) -> Result<Self, GatewayError> {
        let mut transport = connector.connect(url).await?;
        let open = wait_for_open(transport.as_mut()).await?;
        tracing::debug!(
            sid = %open.sid,
            ping_interval_ms = open.ping_interval,
            ping_timeout_ms = open.ping_timeout,
            "engine.io session opened"
        );

        let auth = json!({ "token": token });
        transport
            .send(Frame::Text(SocketPacket::connect(Some(auth)).to_frame()))
            .await?;

        let mut session = Self {
            deadline: Instant::now() + liveness_window(&open),
            transport,
            open,
            assembler: BinaryAssembler::new(),
        };
        session.await_connect_ack().await?;
        Ok(session)
    }

    pub fn sid(&self) -> &str {
        &self.open.sid
    }

    async fn await_connect_ack(&mut self) -> Result<(), GatewayError> {
        loop {
            let text = match self.next_frame().await? {
                Frame::Text(text) => text,
                Frame::Binary(_) => continue,
                Frame::Close(_) => return Err(TransportError::Closed.into()),
            };
            match EnginePacket::decode(&text)? {
                EnginePacket::Ping(payload) => self.pong(payload).await?,
                EnginePacket::Message(body) => {
                    let packet = SocketPacket::decode(&body)?;
                    match packet.kind {
                        SocketPacketKind::Connect => return Ok(()),
                        SocketPacketKind::ConnectError => {
                            let reason = packet
                                .error_message()
                                .unwrap_or_else(|| "connection refused".to_string());
                            return Err(GatewayError::HandshakeRejected(reason));
                        }
                        other => {
                            tracing::debug!(kind = ?other, "ignoring packet before connect ack")
                        }
                    }
                }
                EnginePacket::Close => return Err(TransportError::Closed.into()),
                _ => {}
            }
        }
    }

    /// Next application event. Pings, acks and partial binary packets are
    /// handled internally; unparseable frames are logged and skipped.
    #[cfg(test)]
    pub async fn next_event(&mut self) -> Result<EventPayload, SessionEnd> {
        loop {
            let frame = self.recv_frame().await?;
            if let Some(event) = self.handle_frame(frame).await? {
                return Ok(event);
            }
        }
    }

    /// Wait for the next frame. Cancel-safe, so it can sit in a `select!`.
    pub async fn recv_frame(&mut self) -> Result<Frame, SessionEnd> {
        self.next_frame().await.map_err(SessionEnd::from)
    }

    /// Process one frame, returning an event once one is complete.
    pub async fn handle_frame(&mut self, frame: Frame) -> Result<Option<EventPayload>, SessionEnd> {
        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(bytes) => {
                return Ok(match self.assembler.push(bytes) {
                    Ok(Some(assembled)) => into_event(assembled),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping binary frame");
                        None
                    }
                })
            }
            Frame::Close(reason) => {
                tracing::debug!(reason = ?reason, "websocket closed by peer");
                return Err(SessionEnd::Disconnected(REASON_TRANSPORT_CLOSE.to_string()));
            }
        };

        let packet = match EnginePacket::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable engine packet");
                return Ok(None);
            }
        };
        match packet {
            EnginePacket::Ping(payload) => {
                self.pong(payload).await?;
                Ok(None)
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(packet) => self.accept(packet),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparseable socket packet");
                    Ok(None)
                }
            },
            EnginePacket::Close => Err(SessionEnd::Disconnected(
                REASON_TRANSPORT_CLOSE.to_string(),
            )),
            EnginePacket::Open(_)
            | EnginePacket::Pong(_)
            | EnginePacket::Upgrade
            | EnginePacket::Noop => Ok(None),
        }
    }

    fn accept(&mut self, packet: SocketPacket) -> Result<Option<EventPayload>, SessionEnd> {
        if packet.namespace != ROOT_NAMESPACE {
            tracing::debug!(namespace = %packet.namespace, "ignoring packet for other namespace");
            return Ok(None);
        }
        match packet.kind {
            SocketPacketKind::Event
            | SocketPacketKind::BinaryEvent
            | SocketPacketKind::BinaryAck => {
                // binary acks still own attachment frames that must be consumed
                Ok(self.assembler.start(packet).and_then(into_event))
            }
            SocketPacketKind::Disconnect => Err(SessionEnd::Disconnected(
                REASON_SERVER_DISCONNECT.to_string(),
            )),
            SocketPacketKind::ConnectError => {
                let reason = packet
                    .error_message()
                    .unwrap_or_else(|| "connection refused".to_string());
                Err(SessionEnd::Disconnected(format!("connect error: {reason}")))
            }
            SocketPacketKind::Connect | SocketPacketKind::Ack => Ok(None),
        }
    }

    /// Send a packet followed by its binary attachments.
    pub async fn emit(&mut self, assembled: Assembled) -> Result<(), TransportError> {
        let Assembled {
            packet,
            attachments,
        } = assembled;
        self.transport.send(Frame::Text(packet.to_frame())).await?;
        for bytes in attachments {
            self.transport.send(Frame::Binary(bytes)).await?;
        }
        Ok(())
    }

    /// Leave the namespace and close the transport.
    pub async fn disconnect(mut self) {
        let goodbye = Frame::Text(SocketPacket::disconnect().to_frame());
        if let Err(e) = self.transport.send(goodbye).await {
            tracing::debug!(error = %e, "failed to send disconnect packet");
        }
        self.transport.close().await;
    }

    async fn pong(&mut self, payload: String) -> Result<(), GatewayError> {
        self.transport
            .send(Frame::Text(EnginePacket::Pong(payload).encode()))
            .await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, GatewayError> {
        match tokio::time::timeout_at(self.deadline, self.transport.recv()).await {
            Err(_) => Err(GatewayError::PingTimeout),
            Ok(None) => Err(TransportError::Closed.into()),
            Ok(Some(Err(e))) => Err(e.into()),
            Ok(Some(Ok(frame))) => {
                self.deadline = Instant::now() + liveness_window(&self.open);
                Ok(frame)
            }
        }
    }
}

async fn wait_for_open(transport: &mut dyn Transport) -> Result<OpenInfo, GatewayError> {
    loop {
        match transport.recv().await {
            None => return Err(TransportError::Closed.into()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Frame::Text(text))) => {
                if let EnginePacket::Open(info) = EnginePacket::decode(&text)? {
                    return Ok(info);
                }
            }
            Some(Ok(Frame::Binary(_))) => {}
            Some(Ok(Frame::Close(_))) => return Err(TransportError::Closed.into()),
        }
    }
}

fn liveness_window(open: &OpenInfo) -> Duration {
    Duration::from_millis(open.liveness_window_ms())
}

fn into_event(assembled: Assembled) -> Option<EventPayload> {
    if !matches!(
        assembled.packet.kind,
        SocketPacketKind::Event | SocketPacketKind::BinaryEvent
    ) {
        return None;
    }
    match EventPayload::from_assembled(assembled) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "dropping event packet");
            None
        }
    }
}
