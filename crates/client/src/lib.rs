//! Overlay Chat Client - connection to the realtime chat gateway
//!
//! [`GatewayClient`] keeps an authenticated Socket.IO session to the gateway
//! alive, reconnecting with jittered backoff, and exposes:
//! - connection state and the last error as a [`GatewaySnapshot`]
//! - room presence with a local one-second countdown
//! - a single callback for inbound text and image messages
//! - fire-and-forget text and image sends
//!
//! Wire details live in `overlay-chat-protocol`; this crate adds the runtime.

pub mod backoff;
pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod image_store;
pub mod presence;
mod session;
pub mod state;
pub mod transport;

pub use client::{GatewayClient, MessageCallback};
pub use config::{ConfigError, GatewayConfig, ReconnectConfig};
pub use error::{GatewayError, SendImageError};
pub use image_store::{ImageStore, MaterializeError, TempDirImageStore, DEFAULT_RETAINED_IMAGES};
pub use state::{ConnectionState, GatewaySnapshot};
pub use transport::{Connector, Frame, Transport, TransportError, WsConnector};

pub use overlay_chat_protocol::{ImageRef, InboundMessage, MessageKind, MessageOrigin, Presence};
