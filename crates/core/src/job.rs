//! The job model: one upload moving through the queue.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AllocationError, JobError};
use crate::item::{MediaKind, UploadItem};
use crate::resource::ResourceHandle;
use crate::types::{new_job_id, JobId, Timestamp};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Holding an execution slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Uploading | JobStatus::Processing)
    }

    /// No further automatic transition happens from here.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work tracked by the queue.
///
/// Status, progress and error only change through
/// [`Job::apply`](crate::state_machine); the scheduler owns the
/// in-flight flag and the cancellation token.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    item: UploadItem,
    resource: ResourceHandle,
    pub(crate) status: JobStatus,
    pub(crate) progress: u8,
    pub(crate) error: Option<JobError>,
    pub(crate) attempts: u32,
    created_at: Timestamp,
    pub(crate) started_at: Option<Timestamp>,
    pub(crate) finished_at: Option<Timestamp>,
    /// Parent for per-attempt tokens; cancelled on orchestrator teardown.
    parent_cancel: CancellationToken,
    pub(crate) cancel: CancellationToken,
    in_flight: bool,
}

impl Job {
    /// Create a queued job owning `resource`.
    pub fn new(item: UploadItem, resource: ResourceHandle, parent_cancel: &CancellationToken) -> Self {
        Self {
            id: new_job_id(),
            item,
            resource,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            parent_cancel: parent_cancel.clone(),
            cancel: parent_cancel.child_token(),
            in_flight: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn item(&self) -> &UploadItem {
        &self.item
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    /// Release the preview handle. Returns `true` if this call released it.
    pub fn release_resource(&mut self) -> bool {
        self.resource.release()
    }

    /// Re-allocate a preview released by an earlier cancellation.
    pub fn reacquire_resource(&mut self) -> Result<(), AllocationError> {
        self.resource.reacquire(&self.item)
    }

    /// Token handed to the transport for the current attempt.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal the current attempt's transport operation to stop.
    pub fn signal_cancel(&self) {
        self.cancel.cancel();
    }

    /// A transport operation for this job has not exited yet.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    /// Ready to be admitted: queued and no previous operation still running.
    pub fn is_admissible(&self) -> bool {
        self.status == JobStatus::Queued && !self.in_flight
    }

    pub(crate) fn renew_cancel_token(&mut self) {
        self.cancel = self.parent_cancel.child_token();
    }

    /// Immutable copy for presentation.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            name: self.item.name.clone(),
            size_bytes: self.item.size_bytes,
            media_kind: self.item.media_kind(),
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            attempts: self.attempts,
            preview_uri: self.resource.uri().map(str::to_owned),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only projection of a [`Job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub name: String,
    pub size_bytes: u64,
    pub media_kind: MediaKind,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<JobError>,
    pub attempts: u32,
    pub preview_uri: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}
