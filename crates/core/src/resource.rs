//! Disposable preview handles owned by jobs.
//!
//! A [`ResourceHandle`] wraps a URI minted by a [`ResourceAllocator`] and
//! guarantees the allocator's `release` is called exactly once for it,
//! whether through an explicit [`ResourceHandle::release`] or on drop.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::AllocationError;
use crate::item::UploadItem;

/// URI scheme used by [`PreviewAllocator`].
pub const PREVIEW_SCHEME: &str = "preview";

/// Creates and disposes of transient local artifacts for items.
///
/// The orchestrator calls both methods while it holds its queue lock, so
/// they must be cheap and must not block. An allocator backed by slow I/O
/// should mint the URI up front and do the work elsewhere.
pub trait ResourceAllocator: Send + Sync {
    /// Create an artifact for `item` and return its URI.
    fn allocate(&self, item: &UploadItem) -> Result<String, AllocationError>;

    /// Dispose of the artifact behind `uri`. Called once per allocation.
    fn release(&self, uri: &str);
}

/// Exclusive handle to one allocated artifact.
pub struct ResourceHandle {
    uri: String,
    allocator: Arc<dyn ResourceAllocator>,
    released: bool,
}

impl ResourceHandle {
    pub fn allocate(
        allocator: &Arc<dyn ResourceAllocator>,
        item: &UploadItem,
    ) -> Result<Self, AllocationError> {
        let uri = allocator.allocate(item)?;
        Ok(Self {
            uri,
            allocator: Arc::clone(allocator),
            released: false,
        })
    }

    /// The artifact URI, or `None` once released.
    pub fn uri(&self) -> Option<&str> {
        (!self.released).then_some(self.uri.as_str())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the artifact. Returns `true` if this call did the release;
    /// later calls are no-ops.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.allocator.release(&self.uri);
        true
    }

    /// Replace a released handle with a fresh allocation for `item`.
    ///
    /// No-op when the handle is still live.
    pub fn reacquire(&mut self, item: &UploadItem) -> Result<(), AllocationError> {
        if !self.released {
            return Ok(());
        }
        self.uri = self.allocator.allocate(item)?;
        self.released = false;
        Ok(())
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if self.release() {
            tracing::debug!(uri = %self.uri, "Preview released on drop");
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("uri", &self.uri)
            .field("released", &self.released)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PreviewAllocator
// ---------------------------------------------------------------------------

/// Default allocator: mints `preview://<uuid>/<name>` references and keeps
/// track of which ones are still live.
#[derive(Debug, Default)]
pub struct PreviewAllocator {
    live: Mutex<HashSet<String>>,
}

impl PreviewAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of previews allocated and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ResourceAllocator for PreviewAllocator {
    fn allocate(&self, item: &UploadItem) -> Result<String, AllocationError> {
        let uri = format!("{PREVIEW_SCHEME}://{}/{}", uuid::Uuid::new_v4(), item.name);
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.clone());
        tracing::debug!(uri = %uri, "Preview allocated");
        Ok(uri)
    }

    fn release(&self, uri: &str) {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        if !removed {
            tracing::warn!(uri = %uri, "Release for unknown preview");
        }
    }
}
