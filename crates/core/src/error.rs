//! Error taxonomy for the upload queue.
//!
//! - [`CoreError`] is returned by facade operations (unknown id, conflicting
//!   request, bad configuration).
//! - [`AllocationError`] and [`RejectReason`] are reported per item by `add`.
//! - [`JobError`] is recorded on a failed job and surfaced through snapshots.
//! - [`TransportError`] is what a transport returns; the scheduler turns it
//!   into a [`JobError`].
//! - [`HookError`] comes from a completion hook and never changes job status.

use serde::{Deserialize, Serialize};

use crate::state_machine::TransitionError;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: JobId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn job_not_found(id: JobId) -> Self {
        CoreError::NotFound { entity: "Job", id }
    }
}

/// An item could not be turned into a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocationError {
    #[error("Item name must not be empty")]
    EmptyName,

    #[error("Item '{name}' has no file extension")]
    MissingExtension { name: String },

    #[error("File type '.{extension}' is not allowed (allowed: {allowed})")]
    DisallowedType { extension: String, allowed: String },

    #[error("Item '{name}' is empty")]
    EmptyContent { name: String },

    #[error("Item is {size_bytes} bytes, limit is {max_bytes} bytes")]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("Could not create preview: {message}")]
    Backend { message: String },
}

/// Why `add` did not create a job for an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error(transparent)]
    Allocation(AllocationError),

    #[error("Queue is full ({max_outstanding} outstanding jobs)")]
    CapacityExceeded { max_outstanding: usize },
}

/// Failure cause recorded on a job in the `failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum JobError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timed out")]
    Timeout,
}

impl JobError {
    /// Every recorded failure can be retried; hook failures never land here.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Transport(_) | JobError::Cancelled | JobError::Timeout => true,
        }
    }

    /// Stable short name for UI messaging.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Transport(_) => "transport",
            JobError::Cancelled => "cancelled",
            JobError::Timeout => "timeout",
        }
    }
}

/// Error returned by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote side refused or failed the upload.
    #[error("{0}")]
    Failed(String),

    /// The transport stopped because its cancellation token fired.
    #[error("Aborted")]
    Aborted,
}

impl From<TransportError> for JobError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Failed(msg) => JobError::Transport(msg),
            TransportError::Aborted => JobError::Cancelled,
        }
    }
}

/// A completion hook failed after the job reached `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Completion hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
