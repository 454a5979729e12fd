//! In-memory gateway for driving `GatewayClient` in tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use overlay_chat_client::{
    ConnectionState, Connector, Frame, GatewayClient, GatewayConfig, GatewaySnapshot,
    ReconnectConfig, TempDirImageStore, Transport, TransportError,
};

pub const OPEN: &str =
    r#"0{"sid":"test-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
pub const WAIT: Duration = Duration::from_secs(5);

/// Client half of an in-memory websocket.
struct FakeTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.outgoing.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Server half handed to the test for each accepted connection.
pub struct ServerSocket {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

impl ServerSocket {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Frame::Text(text.to_string()));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.to_client.send(Frame::Binary(bytes));
    }

    /// Emit a Socket.IO event with JSON arguments.
    pub fn emit(&self, name: &str, args: Vec<Value>) {
        let mut items = vec![Value::String(name.to_string())];
        items.extend(args);
        self.send_text(&format!("42{}", Value::Array(items)));
    }

    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Next frame from the client, `None` once it hung up.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
    }

    pub async fn recv_text(&mut self) -> String {
        match self.recv().await {
            Some(Frame::Text(text)) => text,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Next Socket.IO event from the client as `(name, args)`.
    pub async fn recv_event(&mut self) -> (String, Vec<Value>) {
        let text = self.recv_text().await;
        let body = text
            .strip_prefix("42")
            .or_else(|| text.strip_prefix("451-"))
            .unwrap_or_else(|| panic!("expected event frame, got {text}"));
        let Value::Array(mut items) = serde_json::from_str(body).expect("event json") else {
            panic!("event body is not an array: {body}");
        };
        let Value::String(name) = items.remove(0) else {
            panic!("event without name: {body}");
        };
        (name, items)
    }

    /// Run the Engine.IO open and Socket.IO connect exchange, returning the
    /// auth payload the client presented.
    pub async fn accept(&mut self) -> Value {
        let auth = self.open().await;
        self.send_text(r#"40{"sid":"socket-1"}"#);
        auth
    }

    pub async fn reject(&mut self, message: &str) -> Value {
        let auth = self.open().await;
        self.send_text(&format!(r#"44{{"message":"{message}"}}"#));
        auth
    }

    async fn open(&mut self) -> Value {
        self.send_text(OPEN);
        let connect = self.recv_text().await;
        let body = connect
            .strip_prefix("40")
            .unwrap_or_else(|| panic!("expected connect packet, got {connect}"));
        serde_json::from_str(body).expect("auth json")
    }

    /// Accept and consume the `join` / `getPresence` requests.
    pub async fn accept_session(&mut self) -> Value {
        let auth = self.accept().await;
        assert_eq!(self.recv_event().await.0, "join");
        assert_eq!(self.recv_event().await.0, "getPresence");
        auth
    }
}

/// Hands out in-memory transports and forwards their server halves.
pub struct FakeConnector {
    sockets: mpsc::UnboundedSender<ServerSocket>,
    attempts: AtomicUsize,
    refuse: AtomicBool,
    panic_next: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSocket>) {
        let (sockets, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            sockets,
            attempts: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
        });
        (connector, rx)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make the next connection attempt panic inside the supervisor.
    pub fn panic_on_next_connect(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("connector blew up");
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Other("connection refused".to_string()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let server = ServerSocket {
            to_client,
            from_client,
            closed: Arc::clone(&closed),
        };
        self.sockets
            .send(server)
            .map_err(|_| TransportError::Other("test dropped the server side".to_string()))?;
        Ok(Box::new(FakeTransport {
            incoming,
            outgoing,
            closed,
        }))
    }
}

pub struct Harness {
    pub client: GatewayClient,
    pub connector: Arc<FakeConnector>,
    pub sockets: mpsc::UnboundedReceiver<ServerSocket>,
    pub messages: mpsc::UnboundedReceiver<overlay_chat_client::InboundMessage>,
    pub image_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let image_dir = tempfile::tempdir().expect("tempdir");
        let (connector, sockets) = FakeConnector::new();
        let config = GatewayConfig::new(Url::parse("http://gateway.test").expect("url"))
            .with_reconnect(fast_reconnect())
            .with_image_dir(image_dir.path());
        let store = Arc::new(TempDirImageStore::new(image_dir.path()));
        let client = GatewayClient::with_components(config, connector.clone(), store)
            .expect("client");

        let (tx, messages) = mpsc::unbounded_channel();
        client.set_on_message(move |message| {
            let _ = tx.send(message);
        });

        Self {
            client,
            connector,
            sockets,
            messages,
            image_dir,
        }
    }

    pub async fn next_socket(&mut self) -> ServerSocket {
        tokio::time::timeout(WAIT, self.sockets.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Connect and complete a session, returning the server side.
    pub async fn connected(&mut self) -> ServerSocket {
        assert!(self.client.connect("token-123"));
        let mut server = self.next_socket().await;
        server.accept_session().await;
        self.wait_for(|s| s.state == ConnectionState::Connected).await;
        server
    }

    pub async fn wait_for<F>(&self, predicate: F) -> GatewaySnapshot
    where
        F: FnMut(&GatewaySnapshot) -> bool,
    {
        let mut rx = self.client.subscribe();
        let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("client actor stopped");
        snapshot.clone()
    }

    pub async fn next_message(&mut self) -> overlay_chat_client::InboundMessage {
        tokio::time::timeout(WAIT, self.messages.recv())
            .await
            .expect("timed out waiting for message")
            .expect("callback dropped")
    }
}

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay_ms: 10,
        max_delay_ms: 40,
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: None,
    }
}

/// Let queued work on the runtime run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
