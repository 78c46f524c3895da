//! Completion hooks: downstream work that runs once per completed upload.

use async_trait::async_trait;
use reelflow_core::types::Timestamp;
use reelflow_core::{HookError, JobId, UploadItem};
use serde::{Deserialize, Serialize};

use crate::transport::TransferReceipt;

/// The upload a completion hook is called for.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub job_id: JobId,
    pub attempt: u32,
    pub item: UploadItem,
    pub preview_uri: Option<String>,
    pub receipt: TransferReceipt,
    pub completed_at: Timestamp,
}

/// Runs after a job reaches `completed`.
///
/// Called exactly once per transition into `completed`. An error is logged
/// and recorded as a [`HookFailure`]; the job stays completed.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_completed(&self, upload: &CompletedUpload) -> Result<(), HookError>;
}

/// A completion hook error, kept for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookFailure {
    pub job_id: JobId,
    pub name: String,
    pub message: String,
    pub failed_at: Timestamp,
}
