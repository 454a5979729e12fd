//! Gateway event names, decoded inbound events and outbound envelopes.

use serde_json::{json, Value};

use crate::packet::{placeholder, Assembled, PacketError, SocketPacket};

// Outbound
pub const JOIN: &str = "join";
pub const GET_PRESENCE: &str = "getPresence";
pub const SEND_MESSAGE: &str = "sendMessage";
pub const SEND_IMAGE: &str = "sendImage";

// Inbound
pub const NEW_MESSAGE: &str = "newMessage";
pub const SESSION_ENDED: &str = "sessionEnded";

/// Every event name the server has used for presence snapshots.
pub const PRESENCE_EVENTS: &[&str] = &["presenceUpdate", "presence", "roomPresence"];

pub fn is_presence_event(name: &str) -> bool {
    PRESENCE_EVENTS.contains(&name)
}

/// An inbound event: its name, positional arguments and any binary attachments
/// the arguments reference through placeholders.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPayload {
    pub name: String,
    pub args: Vec<Value>,
    pub attachments: Vec<Vec<u8>>,
}

impl EventPayload {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Vec<u8>>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn from_assembled(assembled: Assembled) -> Result<Self, PacketError> {
        let Assembled {
            packet,
            attachments,
        } = assembled;
        let Some(Value::Array(mut items)) = packet.data else {
            return Err(PacketError::MissingEventName);
        };
        if items.is_empty() {
            return Err(PacketError::MissingEventName);
        }
        let Value::String(name) = items.remove(0) else {
            return Err(PacketError::MissingEventName);
        };
        Ok(Self {
            name,
            args: items,
            attachments,
        })
    }

    /// First positional argument, or `null` when the event carried none.
    pub fn first_arg(&self) -> &Value {
        self.args.first().unwrap_or(&Value::Null)
    }
}

/// A text chat message on its way to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTextMessage {
    content: String,
}

impl OutboundTextMessage {
    /// `None` when the text is empty after trimming.
    pub fn new(text: &str) -> Option<Self> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            content: content.to_string(),
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn to_packet(&self) -> SocketPacket {
        SocketPacket::event(
            SEND_MESSAGE,
            vec![json!({ "type": "text", "content": self.content })],
        )
    }
}

/// An image upload: a `{name, type, size}` descriptor plus the raw bytes as a
/// single binary attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundImageMessage {
    name: String,
    mime: String,
    bytes: Vec<u8>,
}

impl OutboundImageMessage {
    /// `None` when there are no bytes to send.
    pub fn new(bytes: Vec<u8>, name: &str, mime: &str) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            mime: mime.to_string(),
            bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn metadata(&self) -> Value {
        json!({ "name": self.name, "type": self.mime, "size": self.bytes.len() })
    }

    pub fn into_packet(self) -> Assembled {
        let packet = SocketPacket::binary_event(SEND_IMAGE, vec![self.metadata(), placeholder(0)], 1);
        Assembled {
            packet,
            attachments: vec![self.bytes],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::SocketPacketKind;

    #[test]
    fn presence_aliases_are_recognised() {
        assert!(is_presence_event("presenceUpdate"));
        assert!(is_presence_event("roomPresence"));
        assert!(!is_presence_event("newMessage"));
    }

    #[test]
    fn text_message_is_trimmed() {
        let msg = OutboundTextMessage::new("  hi there \n").unwrap();
        assert_eq!(msg.content(), "hi there");
        assert_eq!(
            msg.to_packet().to_frame(),
            r#"42["sendMessage",{"content":"hi there","type":"text"}]"#
        );
    }

    #[test]
    fn whitespace_text_is_rejected() {
        assert!(OutboundTextMessage::new("   ").is_none());
        assert!(OutboundTextMessage::new("").is_none());
    }

    #[test]
    fn image_message_carries_metadata_and_one_attachment() {
        let msg = OutboundImageMessage::new(vec![1, 2, 3], "shot.png", "image/png").unwrap();
        let assembled = msg.into_packet();
        assert_eq!(assembled.packet.kind, SocketPacketKind::BinaryEvent);
        assert_eq!(assembled.packet.attachments, 1);
        assert_eq!(assembled.attachments, vec![vec![1, 2, 3]]);
        assert_eq!(
            assembled.packet.to_frame(),
            r#"451-["sendImage",{"name":"shot.png","size":3,"type":"image/png"},{"_placeholder":true,"num":0}]"#
        );
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(OutboundImageMessage::new(Vec::new(), "x.png", "image/png").is_none());
    }

    #[test]
    fn payload_splits_name_from_arguments() {
        let packet = SocketPacket::event("presenceUpdate", vec![json!({ "count": 1 })]);
        let payload = EventPayload::from_assembled(Assembled {
            packet,
            attachments: Vec::new(),
        })
        .unwrap();
        assert_eq!(payload.name, "presenceUpdate");
        assert_eq!(payload.first_arg(), &json!({ "count": 1 }));
    }

    #[test]
    fn payload_without_name_is_rejected() {
        let packet = SocketPacket::decode("2[42]").unwrap();
        let result = EventPayload::from_assembled(Assembled {
            packet,
            attachments: Vec::new(),
        });
        assert_eq!(result, Err(PacketError::MissingEventName));
    }
}
