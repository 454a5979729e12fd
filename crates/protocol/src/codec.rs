//! Payload codec: turns untyped, server-controlled JSON into canonical values.
//!
//! The server's schema has drifted over time (aliased field names, integer vs
//! float encodings, several ways of shipping image bytes). Each field is read
//! through an ordered list of extractors; the first one that succeeds wins, so
//! a new alias is one more entry in a slice rather than another branch.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::events::EventPayload;
use crate::packet::placeholder_index;
use crate::types::Presence;

/// Fallback for senders the payload does not name.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Fallback file name for images that arrive without one.
pub const DEFAULT_IMAGE_NAME: &str = "image";

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Why an inbound message was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message payload is not an object")]
    NotAnObject,
    #[error("unsupported message type '{0}'")]
    UnsupportedKind(String),
    #[error("text message has no content")]
    EmptyText,
    #[error("image message has neither image data nor caption")]
    EmptyImage,
}

/// A decoded message, before any image bytes are written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text {
        sender_name: String,
        content: String,
    },
    Image {
        sender_name: String,
        caption: Option<String>,
        /// `None` when the payload declared an image whose bytes could not be decoded.
        source: Option<ImageSource>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Embedded {
        bytes: Vec<u8>,
        name: String,
        mime: String,
    },
    Url(String),
}

type Extractor<T> = fn(&Map<String, Value>) -> Option<T>;
type ByteExtractor = fn(&Value, &[Vec<u8>]) -> Option<Vec<u8>>;

const COUNT_FIELDS: &[Extractor<u64>] = &[count_field, participant_count_field];
const REMAINING_FIELDS: &[Extractor<u64>] = &[remaining_ms_field, ttl_seconds_field];
const SENDER_FIELDS: &[Extractor<String>] = &[from_name_field, from_string_field, sender_name_field];
const CONTENT_FIELDS: &[Extractor<String>] = &[content_field, message_field, text_field];
const IMAGE_BYTE_SHAPES: &[ByteExtractor] = &[
    attachment_bytes,
    byte_array,
    buffer_descriptor,
    typed_array,
];

fn first_match<T>(map: &Map<String, Value>, extractors: &[Extractor<T>]) -> Option<T> {
    extractors.iter().find_map(|extract| extract(map))
}

// =============================================================================
// Presence
// =============================================================================

/// Participant count from `count` or `participantCount`; 0 when absent.
pub fn decode_count(raw: &Value) -> u64 {
    raw.as_object()
        .and_then(|map| first_match(map, COUNT_FIELDS))
        .unwrap_or(0)
}

/// Remaining session time in milliseconds from `remainingMs` or `ttlSeconds`; 0 when absent.
pub fn decode_remaining(raw: &Value) -> u64 {
    raw.as_object()
        .and_then(|map| first_match(map, REMAINING_FIELDS))
        .unwrap_or(0)
}

pub fn decode_presence(raw: &Value) -> Presence {
    Presence::new(decode_count(raw), decode_remaining(raw))
}

fn count_field(map: &Map<String, Value>) -> Option<u64> {
    map.get("count").and_then(whole_number)
}

fn participant_count_field(map: &Map<String, Value>) -> Option<u64> {
    map.get("participantCount").and_then(whole_number)
}

fn remaining_ms_field(map: &Map<String, Value>) -> Option<u64> {
    map.get("remainingMs").and_then(whole_number)
}

fn ttl_seconds_field(map: &Map<String, Value>) -> Option<u64> {
    let Value::Number(number) = map.get("ttlSeconds")? else {
        return None;
    };
    Some(scaled(number, 1000))
}

/// Integer or float, truncated toward zero and clamped at zero.
fn whole_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => Some(scaled(number, 1)),
        _ => None,
    }
}

fn scaled(number: &Number, factor: u64) -> u64 {
    if let Some(n) = number.as_u64() {
        return n.saturating_mul(factor);
    }
    if number.is_i64() {
        return 0;
    }
    match number.as_f64() {
        // float -> int casts saturate
        Some(f) if f > 0.0 => (f * factor as f64).trunc() as u64,
        _ => 0,
    }
}

// =============================================================================
// Images
// =============================================================================

/// Image bytes from any of the shapes the server has used:
/// a binary attachment placeholder, an array of 0-255 integers, a
/// `{"type": "Buffer", "data": [...]}` descriptor or a typed-array object
/// (`{"0": 137, "1": 80, ...}`). `None` for anything else.
pub fn decode_image_bytes(raw: &Value, attachments: &[Vec<u8>]) -> Option<Vec<u8>> {
    IMAGE_BYTE_SHAPES
        .iter()
        .find_map(|extract| extract(raw, attachments))
        .filter(|bytes| !bytes.is_empty())
}

fn attachment_bytes(raw: &Value, attachments: &[Vec<u8>]) -> Option<Vec<u8>> {
    placeholder_index(raw).and_then(|num| attachments.get(num).cloned())
}

fn byte_array(raw: &Value, _: &[Vec<u8>]) -> Option<Vec<u8>> {
    raw.as_array()?.iter().map(byte).collect()
}

fn buffer_descriptor(raw: &Value, attachments: &[Vec<u8>]) -> Option<Vec<u8>> {
    let map = raw.as_object()?;
    if map.get("type").and_then(Value::as_str) != Some("Buffer") {
        return None;
    }
    byte_array(map.get("data")?, attachments)
}

fn typed_array(raw: &Value, _: &[Vec<u8>]) -> Option<Vec<u8>> {
    let map = raw.as_object()?;
    let mut indexed = map
        .iter()
        .map(|(key, value)| Some((key.parse::<usize>().ok()?, byte(value)?)))
        .collect::<Option<Vec<_>>>()?;
    indexed.sort_unstable_by_key(|(index, _)| *index);
    // indices must be exactly 0..len
    if indexed.iter().enumerate().any(|(i, (index, _))| i != *index) {
        return None;
    }
    Some(indexed.into_iter().map(|(_, b)| b).collect())
}

fn byte(value: &Value) -> Option<u8> {
    value.as_u64().and_then(|n| u8::try_from(n).ok())
}

/// The declared MIME type when present, otherwise a guess from the file extension.
pub fn infer_mime_type(file_name: &str, declared_mime: &str) -> String {
    let declared = declared_mime.trim();
    if !declared.is_empty() {
        return declared.to_string();
    }
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => OCTET_STREAM,
    }
    .to_string()
}

/// File extension used when writing bytes of the given MIME type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

// =============================================================================
// Messages
// =============================================================================

fn from_name_field(map: &Map<String, Value>) -> Option<String> {
    map.get("from")?.get("name").and_then(non_blank)
}

fn from_string_field(map: &Map<String, Value>) -> Option<String> {
    map.get("from").and_then(non_blank)
}

fn sender_name_field(map: &Map<String, Value>) -> Option<String> {
    map.get("senderName").and_then(non_blank)
}

fn content_field(map: &Map<String, Value>) -> Option<String> {
    map.get("content").and_then(non_blank)
}

/// Payloads from before typed envelopes put the text under `message`.
fn message_field(map: &Map<String, Value>) -> Option<String> {
    map.get("message").and_then(non_blank)
}

fn text_field(map: &Map<String, Value>) -> Option<String> {
    map.get("text").and_then(non_blank)
}

fn non_blank(value: &Value) -> Option<String> {
    let trimmed = value.as_str()?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(non_blank)
}

/// Decode a `newMessage` event.
///
/// Image bytes are looked for under `imageData` first, then in the second
/// positional argument. Embedded bytes win over `imageUrl`.
pub fn decode_message(event: &EventPayload) -> Result<WireMessage, DecodeError> {
    let map = event.first_arg().as_object().ok_or(DecodeError::NotAnObject)?;

    let sender_name =
        first_match(map, SENDER_FIELDS).unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let content = first_match(map, CONTENT_FIELDS);

    let image_data = map.get("imageData").filter(|raw| !raw.is_null());
    let second_arg = event.args.get(1).filter(|raw| !raw.is_null());
    let embedded = image_data
        .into_iter()
        .chain(second_arg)
        .find_map(|raw| decode_image_bytes(raw, &event.attachments));
    let declares_image = image_data.is_some() || second_arg.is_some();
    let image_url = string_field(map, "imageUrl");

    let is_image = match map.get("type").and_then(Value::as_str) {
        Some("text") => false,
        Some("image") => true,
        Some(other) => return Err(DecodeError::UnsupportedKind(other.to_string())),
        None => declares_image || image_url.is_some(),
    };

    if !is_image {
        let content = content.ok_or(DecodeError::EmptyText)?;
        return Ok(WireMessage::Text {
            sender_name,
            content,
        });
    }

    let source = match (embedded, image_url) {
        (Some(bytes), _) => {
            let name = string_field(map, "imageName")
                .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string());
            let declared = string_field(map, "imageType").unwrap_or_default();
            let mime = infer_mime_type(&name, &declared);
            Some(ImageSource::Embedded { bytes, name, mime })
        }
        (None, Some(url)) => Some(ImageSource::Url(url)),
        (None, None) => None,
    };

    if source.is_none() && content.is_none() {
        return Err(DecodeError::EmptyImage);
    }

    Ok(WireMessage::Image {
        sender_name,
        caption: content,
        source,
    })
}
