//! Upload items: what a caller hands to the queue.
//!
//! An [`UploadItem`] only describes the payload (name, size, where the bytes
//! live). Reading the bytes is the transport's business.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ── Extension tables ─────────────────────────────────────────────────

/// Video (footage) file extensions.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv", "m4v"];

/// Still image file extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "tiff"];

/// Audio file extensions.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "m4a", "ogg", "flac"];

// ── Types ────────────────────────────────────────────────────────────

/// Broad media category derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
    Other,
}

impl MediaKind {
    /// Classify a lowercase extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        if VIDEO_EXTENSIONS.contains(&ext) {
            MediaKind::Video
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Other => "other",
        }
    }
}

/// Where the bytes of an item live.
#[derive(Clone)]
pub enum ContentRef {
    /// A file on local disk.
    File(PathBuf),
    /// Bytes already held in memory (e.g. a rendered overlay).
    Inline(Arc<[u8]>),
    /// A remote source link to ingest from.
    Remote(String),
}

impl fmt::Debug for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRef::File(path) => f.debug_tuple("File").field(path).finish(),
            ContentRef::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            ContentRef::Remote(url) => f.debug_tuple("Remote").field(url).finish(),
        }
    }
}

/// Caller-supplied payload descriptor.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Display name, usually the file name (e.g. `"intro.mp4"`).
    pub name: String,
    /// Payload size in bytes. Zero when unknown (remote sources).
    pub size_bytes: u64,
    pub content: ContentRef,
    pub mime_type: Option<String>,
}

impl UploadItem {
    /// Describe a file on disk whose size is already known.
    pub fn file(name: impl Into<String>, size_bytes: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            content: ContentRef::File(path.into()),
            mime_type: None,
        }
    }

    /// Describe an in-memory payload.
    pub fn inline(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            name: name.into(),
            size_bytes: bytes.len() as u64,
            content: ContentRef::Inline(bytes),
            mime_type: None,
        }
    }

    /// Describe a remote source link. Size is unknown until fetched.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes: 0,
            content: ContentRef::Remote(url.into()),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Lowercase extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn media_kind(&self) -> MediaKind {
        self.extension()
            .map(|ext| MediaKind::from_extension(&ext))
            .unwrap_or(MediaKind::Other)
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.content, ContentRef::Remote(_))
    }
}
