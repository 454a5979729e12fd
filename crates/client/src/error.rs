//! Connection-level error types.

use std::path::PathBuf;

use thiserror::Error;

use overlay_chat_protocol::PacketError;

use crate::transport::TransportError;

/// Why a gateway session could not be established or ended.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The server answered the handshake with CONNECT_ERROR (e.g. a bad token).
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] PacketError),

    #[error("ping timeout")]
    PingTimeout,
}

/// Returned by `send_image_file` when the image cannot be read.
#[derive(Debug, Error)]
pub enum SendImageError {
    #[error("failed to read image {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image file {} is empty", .0.display())]
    Empty(PathBuf),
}
