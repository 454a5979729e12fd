//! Engine.IO v4 / Socket.IO v5 packet framing.
//!
//! Every text websocket frame carries one Engine.IO packet: a single digit type
//! followed by an optional body. Socket.IO packets ride inside Engine.IO
//! `message` packets and use the layout
//! `<type>[<attachments>-][<namespace>,][<ack id>][<json>]`.
//!
//! Binary events announce how many attachments follow; each attachment then
//! arrives as its own binary websocket frame and is referenced from the JSON
//! body by a `{"_placeholder": true, "num": n}` object.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// The default Socket.IO namespace.
pub const ROOT_NAMESPACE: &str = "/";

/// Protocol revision sent in the `EIO` query parameter.
pub const ENGINE_IO_VERSION: &str = "4";

/// Most binary attachments a single packet may announce.
pub const MAX_ATTACHMENTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket packet type '{0}'")]
    UnknownSocketType(char),
    #[error("invalid attachment count")]
    InvalidAttachments,
    #[error("invalid open payload: {0}")]
    InvalidOpen(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("event packet has no event name")]
    MissingEventName,
    #[error("binary frame received with no pending binary packet")]
    UnexpectedBinary,
}

// =============================================================================
// Engine.IO
// =============================================================================

/// Session parameters announced by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    /// Longest silence tolerated before the session is considered dead.
    pub fn liveness_window_ms(&self) -> u64 {
        self.ping_interval.saturating_add(self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let kind = text.chars().next().ok_or(PacketError::Empty)?;
        let body = &text[kind.len_utf8()..];
        match kind {
            '0' => serde_json::from_str(body)
                .map(EnginePacket::Open)
                .map_err(|e| PacketError::InvalidOpen(e.to_string())),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => {
                format!("0{}", serde_json::to_string(info).unwrap_or_default())
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(payload) => format!("2{payload}"),
            EnginePacket::Pong(payload) => format!("3{payload}"),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

// =============================================================================
// Socket.IO
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl SocketPacketKind {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '0' => SocketPacketKind::Connect,
            '1' => SocketPacketKind::Disconnect,
            '2' => SocketPacketKind::Event,
            '3' => SocketPacketKind::Ack,
            '4' => SocketPacketKind::ConnectError,
            '5' => SocketPacketKind::BinaryEvent,
            '6' => SocketPacketKind::BinaryAck,
            _ => return None,
        })
    }

    fn as_char(self) -> char {
        match self {
            SocketPacketKind::Connect => '0',
            SocketPacketKind::Disconnect => '1',
            SocketPacketKind::Event => '2',
            SocketPacketKind::Ack => '3',
            SocketPacketKind::ConnectError => '4',
            SocketPacketKind::BinaryEvent => '5',
            SocketPacketKind::BinaryAck => '6',
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            SocketPacketKind::BinaryEvent | SocketPacketKind::BinaryAck
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketKind,
    pub namespace: String,
    pub id: Option<u64>,
    pub attachments: usize,
    pub data: Option<Value>,
}

impl SocketPacket {
    fn new(kind: SocketPacketKind, data: Option<Value>) -> Self {
        Self {
            kind,
            namespace: ROOT_NAMESPACE.to_string(),
            id: None,
            attachments: 0,
            data,
        }
    }

    /// CONNECT to the root namespace, carrying the handshake auth payload.
    pub fn connect(auth: Option<Value>) -> Self {
        Self::new(SocketPacketKind::Connect, auth)
    }

    pub fn disconnect() -> Self {
        Self::new(SocketPacketKind::Disconnect, None)
    }

    pub fn connect_error(message: &str) -> Self {
        Self::new(
            SocketPacketKind::ConnectError,
            Some(json!({ "message": message })),
        )
    }

    pub fn event(name: &str, args: Vec<Value>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::String(name.to_string()));
        data.extend(args);
        Self::new(SocketPacketKind::Event, Some(Value::Array(data)))
    }

    /// Event whose arguments reference `attachments` binary frames via placeholders.
    pub fn binary_event(name: &str, args: Vec<Value>, attachments: usize) -> Self {
        let mut packet = Self::event(name, args);
        packet.kind = SocketPacketKind::BinaryEvent;
        packet.attachments = attachments;
        packet
    }

    /// Name of an EVENT / BINARY_EVENT packet.
    pub fn event_name(&self) -> Option<&str> {
        match self.kind {
            SocketPacketKind::Event | SocketPacketKind::BinaryEvent => self
                .data
                .as_ref()
                .and_then(Value::as_array)
                .and_then(|items| items.first())
                .and_then(Value::as_str),
            _ => None,
        }
    }

    /// Human-readable reason carried by a CONNECT_ERROR packet.
    pub fn error_message(&self) -> Option<String> {
        match self.data.as_ref()? {
            Value::String(message) => Some(message.clone()),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let first = text.chars().next().ok_or(PacketError::Empty)?;
        let kind =
            SocketPacketKind::from_char(first).ok_or(PacketError::UnknownSocketType(first))?;
        let mut rest = &text[first.len_utf8()..];

        let mut attachments = 0;
        if kind.is_binary() {
            let dash = rest.find('-').ok_or(PacketError::InvalidAttachments)?;
            attachments = rest[..dash]
                .parse()
                .ok()
                .filter(|&n| n <= MAX_ATTACHMENTS)
                .ok_or(PacketError::InvalidAttachments)?;
            rest = &rest[dash + 1..];
        }

        let mut namespace = ROOT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    namespace = rest[..comma].to_string();
                    rest = &rest[comma + 1..];
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            rest[..digits].parse().ok()
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest).map_err(|e| PacketError::InvalidJson(e.to_string()))?)
        };

        Ok(Self {
            kind,
            namespace,
            id,
            attachments,
            data,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.kind.is_binary() {
            out.push_str(&self.attachments.to_string());
            out.push('-');
        }
        if self.namespace != ROOT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// The text frame carrying this packet (wrapped in an Engine.IO message).
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// JSON stand-in for the `num`th binary attachment of a packet.
pub fn placeholder(num: usize) -> Value {
    json!({ "_placeholder": true, "num": num })
}

/// Attachment index referenced by a placeholder object.
pub fn placeholder_index(value: &Value) -> Option<usize> {
    let map = value.as_object()?;
    if map.get("_placeholder").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    map.get("num")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

// =============================================================================
// Binary reassembly
// =============================================================================

/// A binary packet together with all of its attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub packet: SocketPacket,
    pub attachments: Vec<Vec<u8>>,
}

/// Collects the binary frames that follow a BINARY_EVENT / BINARY_ACK header.
#[derive(Debug, Default)]
pub struct BinaryAssembler {
    pending: Option<Assembled>,
}

impl BinaryAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin collecting attachments for `packet`.
    ///
    /// Returns the packet straight away when it declares no attachments. A
    /// header that arrives while another packet is still incomplete replaces it.
    pub fn start(&mut self, packet: SocketPacket) -> Option<Assembled> {
        if packet.attachments == 0 {
            return Some(Assembled {
                packet,
                attachments: Vec::new(),
            });
        }
        self.pending = Some(Assembled {
            packet,
            attachments: Vec::new(),
        });
        None
    }

    /// Feed one binary frame; yields the packet once its last attachment lands.
    pub fn push(&mut self, bytes: Vec<u8>) -> Result<Option<Assembled>, PacketError> {
        let pending = self.pending.as_mut().ok_or(PacketError::UnexpectedBinary)?;
        pending.attachments.push(bytes);
        if pending.attachments.len() < pending.packet.attachments {
            return Ok(None);
        }
        Ok(self.pending.take())
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_packet() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let EnginePacket::Open(info) = packet else {
            panic!("expected open packet");
        };
        assert_eq!(info.sid, "abc");
        assert_eq!(info.liveness_window_ms(), 45_000);
        assert_eq!(info.max_payload, Some(1_000_000));
    }

    #[test]
    fn rejects_unknown_engine_type() {
        assert_eq!(
            EnginePacket::decode("9"),
            Err(PacketError::UnknownEngineType('9'))
        );
        assert_eq!(EnginePacket::decode(""), Err(PacketError::Empty));
    }

    #[test]
    fn ping_is_answered_with_matching_pong() {
        let EnginePacket::Ping(payload) = EnginePacket::decode("2payload").unwrap() else {
            panic!("expected ping");
        };
        assert_eq!(EnginePacket::Pong(payload).encode(), "3payload");
    }

    #[test]
    fn encodes_connect_with_auth() {
        let packet = SocketPacket::connect(Some(json!({ "token": "t0k" })));
        assert_eq!(packet.to_frame(), r#"40{"token":"t0k"}"#);
    }

    #[test]
    fn encodes_event_without_arguments() {
        assert_eq!(SocketPacket::event("join", vec![]).to_frame(), r#"42["join"]"#);
    }

    #[test]
    fn decodes_event_with_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/admin,12["hello",1]"#).unwrap();
        assert_eq!(packet.kind, SocketPacketKind::Event);
        assert_eq!(packet.namespace, "/admin");
        assert_eq!(packet.id, Some(12));
        assert_eq!(packet.event_name(), Some("hello"));
    }

    #[test]
    fn decodes_binary_event_header() {
        let packet =
            SocketPacket::decode(r#"51-["newMessage",{"_placeholder":true,"num":0}]"#).unwrap();
        assert_eq!(packet.kind, SocketPacketKind::BinaryEvent);
        assert_eq!(packet.attachments, 1);
        assert_eq!(packet.event_name(), Some("newMessage"));
        assert_eq!(packet.encode(), r#"51-["newMessage",{"_placeholder":true,"num":0}]"#);
    }

    #[test]
    fn binary_header_without_dash_is_invalid() {
        assert_eq!(
            SocketPacket::decode(r#"51["x"]"#),
            Err(PacketError::InvalidAttachments)
        );
    }

    #[test]
    fn oversized_attachment_count_is_invalid() {
        for header in [
            r#"517-["newMessage",{}]"#,
            r#"51000000000-["newMessage",{}]"#,
            r#"5999999999999999999-["newMessage",{}]"#,
            r#"599999999999999999999999-["newMessage",{}]"#,
        ] {
            assert_eq!(
                SocketPacket::decode(header),
                Err(PacketError::InvalidAttachments),
                "{header}"
            );
        }
        let packet = SocketPacket::decode(r#"516-["newMessage",{}]"#).unwrap();
        assert_eq!(packet.attachments, MAX_ATTACHMENTS);
    }

    #[test]
    fn assembler_does_not_reserve_declared_attachments() {
        let mut assembler = BinaryAssembler::new();
        let mut header = SocketPacket::binary_event("x", vec![], 1);
        header.attachments = usize::MAX;

        assert!(assembler.start(header).is_none());
        assert!(assembler.is_pending());
        assert_eq!(assembler.push(vec![1]).unwrap(), None);
    }

    #[test]
    fn connect_error_message_is_extracted() {
        let packet = SocketPacket::decode(r#"4{"message":"invalid token"}"#).unwrap();
        assert_eq!(packet.kind, SocketPacketKind::ConnectError);
        assert_eq!(packet.error_message().as_deref(), Some("invalid token"));
    }

    #[test]
    fn disconnect_has_no_body() {
        let packet = SocketPacket::decode("1").unwrap();
        assert_eq!(packet.kind, SocketPacketKind::Disconnect);
        assert!(packet.data.is_none());
        assert_eq!(SocketPacket::disconnect().to_frame(), "41");
    }

    #[test]
    fn malformed_json_body_is_an_error() {
        assert!(matches!(
            SocketPacket::decode(r#"2["unterminated"#),
            Err(PacketError::InvalidJson(_))
        ));
    }

    #[test]
    fn placeholder_round_trips_index() {
        assert_eq!(placeholder_index(&placeholder(3)), Some(3));
        assert_eq!(placeholder_index(&json!({ "num": 3 })), None);
    }

    #[test]
    fn assembler_waits_for_every_attachment() {
        let mut assembler = BinaryAssembler::new();
        let header = SocketPacket::binary_event("x", vec![placeholder(0), placeholder(1)], 2);
        assert!(assembler.start(header).is_none());
        assert!(assembler.is_pending());
        assert_eq!(assembler.push(vec![1]).unwrap(), None);
        let done = assembler.push(vec![2, 3]).unwrap().unwrap();
        assert_eq!(done.attachments, vec![vec![1], vec![2, 3]]);
        assert!(!assembler.is_pending());
    }

    #[test]
    fn assembler_rejects_stray_binary_frames() {
        let mut assembler = BinaryAssembler::new();
        assert_eq!(assembler.push(vec![1]), Err(PacketError::UnexpectedBinary));
    }

    #[test]
    fn assembler_passes_through_packets_without_attachments() {
        let mut assembler = BinaryAssembler::new();
        let done = assembler
            .start(SocketPacket::event("x", vec![]))
            .expect("no attachments to wait for");
        assert!(done.attachments.is_empty());
    }
}
