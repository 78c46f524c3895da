//! Item admission policies applied by `add` before any job is created.

use crate::error::AllocationError;
use crate::item::{UploadItem, AUDIO_EXTENSIONS, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

/// Largest footage file accepted by the footage library (2 GiB).
pub const MAX_FOOTAGE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Largest still image accepted by the image library (25 MiB).
pub const MAX_IMAGE_BYTES: u64 = 25 * 1024 * 1024;

/// Largest audio file accepted by the audio library (200 MiB).
pub const MAX_AUDIO_BYTES: u64 = 200 * 1024 * 1024;

/// Largest overlay image (10 MiB).
pub const MAX_OVERLAY_BYTES: u64 = 10 * 1024 * 1024;

/// Overlays must support transparency.
pub const OVERLAY_EXTENSIONS: &[&str] = &["png", "webp", "gif"];

/// Decides whether an item may become a job.
pub trait ItemPolicy: Send + Sync {
    fn check(&self, item: &UploadItem) -> Result<(), AllocationError>;
}

impl<F> ItemPolicy for F
where
    F: Fn(&UploadItem) -> Result<(), AllocationError> + Send + Sync,
{
    fn check(&self, item: &UploadItem) -> Result<(), AllocationError> {
        self(item)
    }
}

/// Accepts anything with a non-empty name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ItemPolicy for AllowAll {
    fn check(&self, item: &UploadItem) -> Result<(), AllocationError> {
        if item.name.trim().is_empty() {
            return Err(AllocationError::EmptyName);
        }
        Ok(())
    }
}

/// Extension allow-list with an optional size cap.
#[derive(Debug, Clone)]
pub struct AllowList {
    extensions: Vec<String>,
    max_size_bytes: Option<u64>,
}

impl AllowList {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_size_bytes: None,
        }
    }

    pub fn with_max_size(mut self, max_bytes: u64) -> Self {
        self.max_size_bytes = Some(max_bytes);
        self
    }

    /// Footage library: video files up to [`MAX_FOOTAGE_BYTES`].
    pub fn footage() -> Self {
        Self::new(VIDEO_EXTENSIONS).with_max_size(MAX_FOOTAGE_BYTES)
    }

    /// Image library: stills up to [`MAX_IMAGE_BYTES`].
    pub fn images() -> Self {
        Self::new(IMAGE_EXTENSIONS).with_max_size(MAX_IMAGE_BYTES)
    }

    /// Audio library: audio files up to [`MAX_AUDIO_BYTES`].
    pub fn audio() -> Self {
        Self::new(AUDIO_EXTENSIONS).with_max_size(MAX_AUDIO_BYTES)
    }

    /// Overlay upload: transparent-capable images up to [`MAX_OVERLAY_BYTES`].
    pub fn overlays() -> Self {
        Self::new(OVERLAY_EXTENSIONS).with_max_size(MAX_OVERLAY_BYTES)
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

impl ItemPolicy for AllowList {
    fn check(&self, item: &UploadItem) -> Result<(), AllocationError> {
        AllowAll.check(item)?;

        let ext = item
            .extension()
            .ok_or_else(|| AllocationError::MissingExtension {
                name: item.name.clone(),
            })?;

        if !self.extensions.iter().any(|e| *e == ext) {
            return Err(AllocationError::DisallowedType {
                extension: ext,
                allowed: self.extensions.join(", "),
            });
        }

        // Remote sources report size 0 until fetched; only local payloads
        // can be empty.
        if item.size_bytes == 0 && !item.is_remote() {
            return Err(AllocationError::EmptyContent {
                name: item.name.clone(),
            });
        }

        if let Some(max) = self.max_size_bytes {
            if item.size_bytes > max {
                return Err(AllocationError::TooLarge {
                    size_bytes: item.size_bytes,
                    max_bytes: max,
                });
            }
        }

        Ok(())
    }
}
