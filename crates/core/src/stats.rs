//! Queue-wide statistics derived from job statuses.

use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

/// Counts per status plus overall completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub uploading: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    /// `round(100 * completed / total)`, 0 for an empty queue.
    pub overall_percent: u8,
}

impl QueueStats {
    /// Jobs currently holding an execution slot.
    pub fn active(&self) -> usize {
        self.uploading + self.processing
    }

    /// Nothing is waiting or running.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.active() == 0
    }

    pub fn count(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Uploading => self.uploading,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }
}

/// Aggregate a set of job statuses. Pure and O(n).
pub fn aggregate<I>(statuses: I) -> QueueStats
where
    I: IntoIterator<Item = JobStatus>,
{
    let mut stats = QueueStats::default();
    for status in statuses {
        match status {
            JobStatus::Queued => stats.queued += 1,
            JobStatus::Uploading => stats.uploading += 1,
            JobStatus::Processing => stats.processing += 1,
            JobStatus::Completed => stats.completed += 1,
            JobStatus::Failed => stats.failed += 1,
        }
        stats.total += 1;
    }
    stats.overall_percent = completion_percent(stats.completed, stats.total);
    stats
}

/// Half-up rounded percentage of `completed` over `total`.
pub fn completion_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((200 * completed + total) / (2 * total)) as u8
}
