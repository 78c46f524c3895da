//! Point-in-time views of the queue for presentation.

use reelflow_core::{aggregate, Job, JobId, JobStatus, JobView, QueueStats};
use serde::{Deserialize, Serialize};

use crate::hooks::HookFailure;
use crate::scheduler::QueueState;

/// Immutable copy of the queue taken under a single lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Jobs in insertion order.
    pub jobs: Vec<JobView>,
    pub stats: QueueStats,
    pub running: bool,
    /// Execution slots in use, including cancelled jobs whose transport has
    /// not returned yet.
    pub active_slots: usize,
    pub hook_failures: Vec<HookFailure>,
}

impl QueueSnapshot {
    pub(crate) fn capture(state: &QueueState) -> Self {
        Self {
            jobs: state.jobs.values().map(Job::view).collect(),
            stats: aggregate(state.jobs.values().map(Job::status)),
            running: state.running,
            active_slots: state.active_slots,
            hook_failures: state.hook_failures.clone(),
        }
    }

    pub fn job(&self, id: JobId) -> Option<&JobView> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn with_status(&self, status: JobStatus) -> impl Iterator<Item = &JobView> {
        self.jobs.iter().filter(move |job| job.status == status)
    }

    /// Ids of jobs in `status`, in insertion order.
    pub fn ids_with_status(&self, status: JobStatus) -> Vec<JobId> {
        self.with_status(status).map(|job| job.id).collect()
    }
}
