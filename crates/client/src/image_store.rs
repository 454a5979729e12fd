//! Writing received image bytes to local files.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use overlay_chat_protocol::{
    extension_for_mime, ImageRef, ImageSource, InboundMessage, WireMessage,
};

const UNAVAILABLE_NOTE: &str = "image unavailable";
const MAX_STEM_LEN: usize = 48;

/// Images a [`TempDirImageStore`] keeps before deleting its oldest file.
pub const DEFAULT_RETAINED_IMAGES: usize = 256;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("refusing to write an empty image")]
    Empty,
    #[error("failed to write image {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for received image bytes.
#[cfg_attr(test, mockall::automock)]
pub trait ImageStore: Send + Sync {
    /// Persist `bytes` and return the path of the written file.
    fn materialize(
        &self,
        bytes: &[u8],
        suggested_name: &str,
        mime: &str,
    ) -> Result<PathBuf, MaterializeError>;
}

/// Writes each image to a new, uniquely named file in one directory.
///
/// Only the most recent `retain` files written by this store are kept; older
/// ones are deleted as new images arrive. Anything else in the directory,
/// including files from earlier runs, is left to the caller.
#[derive(Debug)]
pub struct TempDirImageStore {
    dir: PathBuf,
    retain: usize,
    written: Mutex<VecDeque<PathBuf>>,
}

impl TempDirImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retain: DEFAULT_RETAINED_IMAGES,
            written: Mutex::new(VecDeque::new()),
        }
    }

    /// Keep at most `retain` images (at least one) on disk.
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn track(&self, path: PathBuf) {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        written.push_back(path);
        while written.len() > self.retain {
            let Some(oldest) = written.pop_front() else { break };
            match fs::remove_file(&oldest) {
                Ok(()) => tracing::debug!(path = %oldest.display(), "old image removed"),
                Err(e) => {
                    tracing::debug!(error = %e, path = %oldest.display(), "could not remove old image")
                }
            }
        }
    }
}

impl ImageStore for TempDirImageStore {
    fn materialize(
        &self,
        bytes: &[u8],
        suggested_name: &str,
        mime: &str,
    ) -> Result<PathBuf, MaterializeError> {
        if bytes.is_empty() {
            return Err(MaterializeError::Empty);
        }
        fs::create_dir_all(&self.dir).map_err(|source| MaterializeError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let file_name = format!(
            "{}-{}.{}",
            sanitize_stem(suggested_name),
            Uuid::new_v4().simple(),
            extension_for_mime(mime)
        );
        let path = self.dir.join(file_name);
        let io_error = |source| MaterializeError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_error)?;
        file.write_all(bytes).map_err(io_error)?;
        file.flush().map_err(io_error)?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "image written");
        self.track(path.clone());
        Ok(path)
    }
}

/// File stem from a sender-supplied name: extension removed, anything outside
/// `[A-Za-z0-9_-]` replaced, length capped.
fn sanitize_stem(name: &str) -> String {
    let base = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let stem: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    if stem.trim_matches('_').is_empty() {
        "image".to_string()
    } else {
        stem
    }
}

/// Turn a decoded message into one ready for display, writing embedded
/// image bytes through `store`.
///
/// An image that cannot be shown falls back to its caption as a text message;
/// without a caption the message is dropped.
pub fn materialize_message(message: WireMessage, store: &dyn ImageStore) -> Option<InboundMessage> {
    let (sender_name, caption, source) = match message {
        WireMessage::Text {
            sender_name,
            content,
        } => return Some(InboundMessage::text(sender_name, content)),
        WireMessage::Image {
            sender_name,
            caption,
            source,
        } => (sender_name, caption, source),
    };

    let image_ref = match source {
        Some(ImageSource::Url(url)) => Ok(ImageRef::Remote { url }),
        Some(ImageSource::Embedded { bytes, name, mime }) => store
            .materialize(&bytes, &name, &mime)
            .map(|path| ImageRef::File { path, mime })
            .map_err(|e| {
                tracing::warn!(error = %e, sender = %sender_name, "could not store received image");
            }),
        None => {
            tracing::warn!(sender = %sender_name, "received image without usable data");
            Err(())
        }
    };

    match (image_ref, caption) {
        (Ok(image_ref), caption) => Some(InboundMessage::image(sender_name, image_ref, caption)),
        (Err(()), Some(caption)) => Some(InboundMessage::text(
            sender_name,
            format!("{caption}\n[{UNAVAILABLE_NOTE}]"),
        )),
        (Err(()), None) => None,
    }
}
