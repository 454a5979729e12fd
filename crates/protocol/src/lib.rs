//! Overlay Chat Protocol - shared types for the chat gateway client
//!
//! This crate contains everything about the gateway's wire format that does not
//! need a runtime:
//! - Engine.IO / Socket.IO packet framing and binary attachment reassembly
//! - Event names and outbound envelopes
//! - The payload codec that normalises drifting server payloads
//! - Canonical value types (`Presence`, `InboundMessage`, `ImageRef`)
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json and thiserror
//! 2. **No I/O** - Pure data types, parsing and serialization
//! 3. **Tolerant decoding** - Malformed payloads decode to defaults or typed errors, never panics

pub mod codec;
pub mod events;
pub mod packet;
pub mod types;

pub use codec::{
    decode_count, decode_image_bytes, decode_message, decode_presence, decode_remaining,
    extension_for_mime, infer_mime_type, DecodeError, ImageSource, WireMessage,
};
pub use events::{is_presence_event, EventPayload, OutboundImageMessage, OutboundTextMessage};
pub use packet::{
    Assembled, BinaryAssembler, EnginePacket, OpenInfo, PacketError, SocketPacket,
    SocketPacketKind, MAX_ATTACHMENTS,
};
pub use types::{ImageRef, InboundMessage, MessageKind, MessageOrigin, Presence};
