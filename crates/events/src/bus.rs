//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`QueueEvent`]s to any number of observers (UI
//! layers, loggers, tests). It is shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use reelflow_core::{JobError, JobId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// QueueEvent
// ---------------------------------------------------------------------------

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEventKind {
    /// The job entered the queue.
    Added { name: String },
    /// The job took an execution slot.
    Admitted { attempt: u32 },
    /// Upload progress advanced.
    Progress { percent: u8 },
    /// Payload fully sent; server-side processing started.
    Processing,
    Completed,
    Failed { error: JobError },
    /// A failed job went back to the queue.
    Requeued,
    /// The job left the set.
    Removed,
    /// The completion hook failed; job status is unchanged.
    HookFailed { message: String },
}

impl QueueEventKind {
    /// Dot-separated event name, e.g. `"job.progress"`.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEventKind::Added { .. } => "job.added",
            QueueEventKind::Admitted { .. } => "job.admitted",
            QueueEventKind::Progress { .. } => "job.progress",
            QueueEventKind::Processing => "job.processing",
            QueueEventKind::Completed => "job.completed",
            QueueEventKind::Failed { .. } => "job.failed",
            QueueEventKind::Requeued => "job.requeued",
            QueueEventKind::Removed => "job.removed",
            QueueEventKind::HookFailed { .. } => "job.hook_failed",
        }
    }
}

/// A job event with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub job_id: JobId,
    pub kind: QueueEventKind,
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(job_id: JobId, kind: QueueEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use reelflow_events::bus::{EventBus, QueueEvent, QueueEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// let job_id = reelflow_core::types::new_job_id();
/// bus.publish(QueueEvent::new(job_id, QueueEventKind::Completed));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: QueueEvent) {
        tracing::trace!(job_id = %event.job_id, event = event.kind.name(), "Queue event");
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
