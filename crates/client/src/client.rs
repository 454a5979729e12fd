//! The gateway client facade.
//!
//! [`GatewayClient`] is the only object the application talks to. Every call
//! returns immediately; the work happens on a single actor task that owns the
//! connection state, the presence tracker and the message callback. Commands
//! from the facade and events from the connection supervisor are applied on
//! that task one at a time, and observers read the result through a
//! [`watch`] channel of [`GatewaySnapshot`]s.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use url::Url;

use overlay_chat_protocol::codec::DEFAULT_IMAGE_NAME;
use overlay_chat_protocol::{
    infer_mime_type, Assembled, InboundMessage, OutboundImageMessage, OutboundTextMessage,
    Presence,
};

use crate::config::{ConfigError, GatewayConfig, ReconnectConfig};
use crate::connection::{
    spawn_supervisor, ConnectionHandle, Supervisor, TransportEvent, TransportEventKind,
};
use crate::error::SendImageError;
use crate::image_store::{ImageStore, TempDirImageStore};
use crate::presence::PresenceTracker;
use crate::state::{ConnectionState, GatewaySnapshot};
use crate::transport::{Connector, WsConnector};

/// Receives every message worth showing to the user.
pub type MessageCallback = Box<dyn FnMut(InboundMessage) + Send + 'static>;

const SESSION_ENDED_NOTICE: &str = "Session ended";

enum Command {
    Connect { token: String, generation: u64 },
    Disconnect,
    Emit(Assembled),
    SetOnMessage(Option<MessageCallback>),
}

/// Handle to the chat gateway. Clones share the same connection.
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<GatewaySnapshot>,
    generation: Arc<AtomicU64>,
}

impl GatewayClient {
    /// Build a client for `config` using the websocket transport and a
    /// temp-directory image store.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let store = Arc::new(TempDirImageStore::new(config.image_dir.clone()));
        Self::with_components(config, Arc::new(WsConnector), store)
    }

    /// Build a client with explicit transport and image store.
    pub fn with_components(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self, ConfigError> {
        let url = config.socket_url()?;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(GatewaySnapshot::default());
        let generation = Arc::new(AtomicU64::new(0));

        let actor = Actor {
            url,
            reconnect: config.reconnect,
            connector,
            store,
            generation: Arc::clone(&generation),
            events,
            connection: None,
            tracker: PresenceTracker::new(),
            tracker_generation: 0,
            snapshot: GatewaySnapshot::default(),
            publisher,
            on_message: None,
        };
        tokio::spawn(actor.run(commands_rx, events_rx));

        Ok(Self {
            commands,
            snapshots,
            generation,
        })
    }

    /// Start connecting with `credential` as the handshake token.
    ///
    /// Replaces any existing connection. Returns `false` without doing
    /// anything when the credential is blank.
    pub fn connect(&self, credential: &str) -> bool {
        let token = credential.trim();
        if token.is_empty() {
            tracing::debug!("ignoring connect with blank credential");
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.command(Command::Connect {
            token: token.to_string(),
            generation,
        })
    }

    /// Close the connection and stop reconnecting. Events still in flight
    /// from the old connection are ignored.
    pub fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.command(Command::Disconnect);
    }

    /// Send a text message. Blank text, or text sent while not connected, is
    /// dropped.
    pub fn send_text(&self, text: &str) {
        if let Some(message) = OutboundTextMessage::new(text) {
            self.command(Command::Emit(Assembled {
                packet: message.to_packet(),
                attachments: Vec::new(),
            }));
        }
    }

    /// Send image bytes, followed by `caption` as a text message when it is
    /// not blank. `mime` may be empty, in which case it is guessed from
    /// `file_name`.
    pub fn send_image(&self, bytes: Vec<u8>, file_name: &str, mime: &str, caption: Option<&str>) {
        let mime = infer_mime_type(file_name, mime);
        let Some(image) = OutboundImageMessage::new(bytes, file_name, &mime) else {
            tracing::debug!(file_name, "ignoring empty image");
            return;
        };
        tracing::debug!(name = image.name(), size = image.size(), "queueing image");
        self.command(Command::Emit(image.into_packet()));
        if let Some(caption) = caption {
            self.send_text(caption);
        }
    }

    /// Read an image from disk and send it like [`send_image`](Self::send_image).
    pub async fn send_image_file(
        &self,
        path: impl AsRef<Path>,
        caption: Option<&str>,
    ) -> Result<(), SendImageError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SendImageError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if bytes.is_empty() {
            return Err(SendImageError::Empty(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string());
        self.send_image(bytes, &file_name, "", caption);
        Ok(())
    }

    /// Register the message callback, replacing any previous one.
    pub fn set_on_message<F>(&self, callback: F)
    where
        F: FnMut(InboundMessage) + Send + 'static,
    {
        self.command(Command::SetOnMessage(Some(Box::new(callback))));
    }

    pub fn clear_on_message(&self) {
        self.command(Command::SetOnMessage(None));
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshots.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.snapshots.borrow().is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.snapshots.borrow().is_connecting()
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshots.borrow().last_error.clone()
    }

    pub fn presence(&self) -> Presence {
        self.snapshots.borrow().presence
    }

    /// A receiver that is notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<GatewaySnapshot> {
        self.snapshots.clone()
    }

    fn command(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            tracing::warn!("gateway client actor has stopped");
            return false;
        }
        true
    }
}

/// Single owner of all observable client state.
struct Actor {
    url: Url,
    reconnect: ReconnectConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn ImageStore>,
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TransportEvent>,
    connection: Option<ConnectionHandle>,
    tracker: PresenceTracker,
    /// Generation the running countdown belongs to
    tracker_generation: u64,
    snapshot: GatewaySnapshot,
    publisher: watch::Sender<GatewaySnapshot>,
    on_message: Option<MessageCallback>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = self.tracker.tick() => self.handle_tick(),
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.shutdown();
        }
        tracing::debug!("gateway client actor stopped");
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { token, generation } => {
                if let Some(previous) = self.connection.take() {
                    tracing::debug!("replacing existing gateway connection");
                    previous.shutdown();
                }
                tracing::info!(url = %self.url, "connecting to chat gateway");
                self.connection = Some(spawn_supervisor(Supervisor {
                    connector: Arc::clone(&self.connector),
                    store: Arc::clone(&self.store),
                    url: self.url.clone(),
                    token,
                    reconnect: self.reconnect.clone(),
                    generation,
                    events: self.events.clone(),
                }));
                self.snapshot.state = ConnectionState::Connecting;
                self.snapshot.last_error = None;
                self.snapshot.reconnect_attempt = 0;
            }
            Command::Disconnect => {
                if let Some(connection) = self.connection.take() {
                    connection.shutdown();
                }
                self.tracker.stop();
                self.snapshot.state = ConnectionState::Disconnected;
                self.snapshot.reconnect_attempt = 0;
            }
            Command::Emit(packet) => match (&self.connection, self.snapshot.state) {
                (Some(connection), ConnectionState::Connected) => connection.emit(packet),
                _ => tracing::debug!(
                    state = %self.snapshot.state,
                    "not connected, dropping outbound packet"
                ),
            },
            Command::SetOnMessage(callback) => self.on_message = callback,
        }
        self.publish();
    }

    fn handle_event(&mut self, event: TransportEvent) {
        if event.generation != self.current_generation() {
            tracing::trace!(generation = event.generation, "ignoring stale transport event");
            return;
        }

        match event.kind {
            TransportEventKind::Connected => {
                self.snapshot.state = ConnectionState::Connected;
                self.snapshot.last_error = None;
                self.snapshot.reconnect_attempt = 0;
            }
            TransportEventKind::Disconnected { reason } => {
                self.snapshot.state = ConnectionState::Disconnected;
                if !reason.trim().is_empty() {
                    self.snapshot.last_error = Some(format!("Disconnected: {reason}"));
                }
            }
            TransportEventKind::Error(detail) => {
                self.snapshot.state = ConnectionState::Disconnected;
                self.snapshot.last_error = Some(format!("Socket error: {detail}"));
            }
            TransportEventKind::Reconnecting { attempt } => {
                self.snapshot.reconnect_attempt = attempt;
            }
            TransportEventKind::GaveUp => {
                self.connection = None;
                self.snapshot.state = ConnectionState::Disconnected;
            }
            TransportEventKind::Presence(presence) => {
                self.tracker.apply_update(presence);
                self.tracker_generation = event.generation;
                self.snapshot.presence = presence;
            }
            TransportEventKind::Message(message) => self.deliver(message),
            TransportEventKind::SessionEnded => {
                self.deliver(InboundMessage::system(SESSION_ENDED_NOTICE))
            }
        }
        self.publish();
    }

    fn handle_tick(&mut self) {
        if self.tracker_generation != self.current_generation() {
            self.tracker.stop();
            return;
        }
        if let Some(presence) = self.tracker.apply_tick() {
            self.snapshot.presence = presence;
            self.publish();
        }
    }

    fn deliver(&mut self, message: InboundMessage) {
        match self.on_message.as_mut() {
            Some(callback) => callback(message),
            None => tracing::debug!(sender = %message.sender_name, "no message callback registered"),
        }
    }

    fn publish(&self) {
        self.publisher.send_if_modified(|current| {
            if *current == self.snapshot {
                return false;
            }
            *current = self.snapshot.clone();
            true
        });
    }
}
