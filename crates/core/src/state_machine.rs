//! Job state machine.
//!
//! ```text
//! queued ──Admit──▶ uploading ──Transmitted──▶ processing ──Processed──▶ completed
//!                       │                          │
//!                       └──────────Fail────────────┴──▶ failed ──Retry──▶ queued
//! ```
//!
//! Every status change goes through [`Job::apply`]. Progress reports are
//! only applied while uploading and never move backwards. A report of 100 or
//! more means the payload is fully sent and acts like `Transmitted`.

use chrono::Utc;

use crate::error::JobError;
use crate::job::{Job, JobStatus};

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The scheduler gave the job an execution slot.
    Admit,
    /// Transport progress report, any non-negative percentage.
    Progress(u32),
    /// The payload has been fully sent; server-side processing follows.
    Transmitted,
    /// Server-side processing finished.
    Processed,
    /// Transport failure, cancellation or timeout.
    Fail(JobError),
    /// Explicit retry of a failed job.
    Retry,
}

impl Trigger {
    fn name(&self) -> &'static str {
        match self {
            Trigger::Admit => "admit",
            Trigger::Progress(_) => "progress",
            Trigger::Transmitted => "transmitted",
            Trigger::Processed => "processed",
            Trigger::Fail(_) => "fail",
            Trigger::Retry => "retry",
        }
    }
}

/// Result of applying a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Status changed.
    Moved { from: JobStatus, to: JobStatus },
    /// Progress advanced to the given value.
    Progressed(u8),
    /// Progress report was stale or out of order and was dropped.
    Discarded,
}

impl Outcome {
    /// The completion hook fires once per transition into `completed`.
    pub fn fires_completion_hook(&self) -> bool {
        matches!(
            self,
            Outcome::Moved {
                to: JobStatus::Completed,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition: {trigger} while {from}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub trigger: &'static str,
}

/// Statuses reachable from `from` in one step.
pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
    match from {
        JobStatus::Queued => &[JobStatus::Uploading],
        JobStatus::Uploading => &[JobStatus::Processing, JobStatus::Failed],
        JobStatus::Processing => &[JobStatus::Completed, JobStatus::Failed],
        JobStatus::Completed => &[],
        JobStatus::Failed => &[JobStatus::Queued],
    }
}

pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    valid_transitions(from).contains(&to)
}

impl Job {
    /// Apply `trigger`, mutating status, progress and error together.
    pub fn apply(&mut self, trigger: Trigger) -> Result<Outcome, TransitionError> {
        let from = self.status;
        match (from, trigger) {
            (JobStatus::Queued, Trigger::Admit) => {
                self.progress = 0;
                self.attempts += 1;
                self.started_at = Some(Utc::now());
                self.finished_at = None;
                Ok(self.move_to(JobStatus::Uploading))
            }

            (JobStatus::Uploading, Trigger::Progress(percent)) if percent >= 100 => {
                self.progress = 100;
                Ok(self.move_to(JobStatus::Processing))
            }
            (JobStatus::Uploading, Trigger::Progress(percent)) => {
                // Below 100 here, so the cast is lossless.
                let percent = percent as u8;
                if percent <= self.progress {
                    return Ok(Outcome::Discarded);
                }
                self.progress = percent;
                Ok(Outcome::Progressed(percent))
            }
            // Reports that race with a status change are not errors.
            (_, Trigger::Progress(_)) => Ok(Outcome::Discarded),

            (JobStatus::Uploading, Trigger::Transmitted) => {
                self.progress = 100;
                Ok(self.move_to(JobStatus::Processing))
            }

            (JobStatus::Processing, Trigger::Processed) => {
                self.finished_at = Some(Utc::now());
                Ok(self.move_to(JobStatus::Completed))
            }

            (JobStatus::Uploading | JobStatus::Processing, Trigger::Fail(error)) => {
                self.error = Some(error);
                self.finished_at = Some(Utc::now());
                Ok(self.move_to(JobStatus::Failed))
            }

            (JobStatus::Failed, Trigger::Retry) => {
                self.progress = 0;
                self.error = None;
                self.started_at = None;
                self.finished_at = None;
                self.renew_cancel_token();
                Ok(self.move_to(JobStatus::Queued))
            }

            (from, trigger) => Err(TransitionError {
                from,
                trigger: trigger.name(),
            }),
        }
    }

    fn move_to(&mut self, to: JobStatus) -> Outcome {
        let from = self.status;
        debug_assert!(can_transition(from, to), "{from} -> {to}");
        self.status = to;
        Outcome::Moved { from, to }
    }
}
