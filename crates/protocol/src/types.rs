//! Canonical value types produced by the codec and consumed by the application.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sender name used for messages the client synthesises itself.
pub const SYSTEM_SENDER: &str = "System";

/// Room state: how many participants are present and how long the session has left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub participant_count: u64,
    pub remaining_ms: u64,
}

impl Presence {
    pub fn new(participant_count: u64, remaining_ms: u64) -> Self {
        Self {
            participant_count,
            remaining_ms,
        }
    }

    /// Remaining time as `HH:MM:SS`. Hours are not wrapped at 24.
    pub fn format_remaining(&self) -> String {
        let total = self.remaining_ms / 1000;
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Relayed by the gateway from a participant.
    #[default]
    Gateway,
    /// Synthesised locally, never sent by a participant.
    Client,
}

/// Where a received image can be loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageRef {
    /// Bytes received over the socket, written to a local file.
    File { path: PathBuf, mime: String },
    /// URL supplied by the server instead of embedded bytes.
    Remote { url: String },
}

/// A chat message ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<ImageRef>,
    #[serde(default)]
    pub origin: MessageOrigin,
}

impl InboundMessage {
    pub fn text(sender_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            sender_name: sender_name.into(),
            text_content: Some(content.into()),
            image_ref: None,
            origin: MessageOrigin::Gateway,
        }
    }

    pub fn image(
        sender_name: impl Into<String>,
        image_ref: ImageRef,
        caption: Option<String>,
    ) -> Self {
        Self {
            kind: MessageKind::Image,
            sender_name: sender_name.into(),
            text_content: caption,
            image_ref: Some(image_ref),
            origin: MessageOrigin::Gateway,
        }
    }

    /// A text message authored by the client itself (e.g. session end notices).
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            origin: MessageOrigin::Client,
            ..Self::text(SYSTEM_SENDER, content)
        }
    }

    pub fn is_system(&self) -> bool {
        self.origin == MessageOrigin::Client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_remaining_time() {
        assert_eq!(Presence::new(1, 0).format_remaining(), "00:00:00");
        assert_eq!(Presence::new(1, 5_999).format_remaining(), "00:00:05");
        assert_eq!(Presence::new(1, 3_723_000).format_remaining(), "01:02:03");
        assert_eq!(Presence::new(1, 90_000_000).format_remaining(), "25:00:00");
    }

    #[test]
    fn presence_defaults_to_zero() {
        assert_eq!(Presence::default(), Presence::new(0, 0));
    }

    #[test]
    fn system_messages_are_text_from_system() {
        let msg = InboundMessage::system("Session ended");
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.is_system());
        assert_eq!(msg.text_content.as_deref(), Some("Session ended"));
        assert!(msg.image_ref.is_none());
    }

    #[test]
    fn participant_named_system_is_not_a_system_message() {
        let msg = InboundMessage::text(SYSTEM_SENDER, "I am the system now");
        assert_eq!(msg.origin, MessageOrigin::Gateway);
        assert!(!msg.is_system());
    }
}
