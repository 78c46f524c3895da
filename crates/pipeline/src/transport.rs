//! The transport boundary.
//!
//! A [`TransportPort`] performs the actual upload for one job attempt. The
//! scheduler hands it the item, a [`ProgressReporter`] and a cancellation
//! token, and records whatever it returns on the job.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use reelflow_core::{JobId, TransportError, UploadItem};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::scheduler::Shared;

/// Everything a transport needs to upload one job attempt.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub job_id: JobId,
    /// 1 for the first admission, incremented on every re-admission.
    pub attempt: u32,
    pub item: UploadItem,
    pub preview_uri: Option<String>,
}

/// What a successful transfer produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Identifier assigned by the remote side, if any.
    pub remote_ref: Option<String>,
    /// Transport-specific payload passed through to the completion hook.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl TransferReceipt {
    pub fn with_remote_ref(remote_ref: impl Into<String>) -> Self {
        Self {
            remote_ref: Some(remote_ref.into()),
            details: serde_json::Value::Null,
        }
    }
}

/// Performs uploads for the queue.
///
/// Implementations must return promptly once `cancel` fires (returning
/// [`TransportError::Aborted`] is conventional). Returning `Ok` completes the
/// job; a transport that never called [`ProgressReporter::transmitted`] is
/// treated as having transmitted everything.
#[async_trait]
pub trait TransportPort: Send + Sync {
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransportError>;
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// A signal a transport sends while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSignal {
    /// Percentage of the payload sent so far.
    Percent(u32),
    /// The payload is fully sent; server-side processing follows.
    Transmitted,
}

type SignalFn = dyn Fn(ProgressSignal) + Send + Sync;

#[derive(Clone)]
enum Sink {
    Queue(Weak<Shared>),
    Callback(Arc<SignalFn>),
    Detached,
}

/// Cloneable, synchronous progress callback for one job attempt.
///
/// Reports from an attempt that has been superseded (cancelled and retried,
/// or removed) are ignored by the queue.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Sink,
    job_id: JobId,
    attempt: u32,
}

impl ProgressReporter {
    pub(crate) fn attached(shared: Weak<Shared>, job_id: JobId, attempt: u32) -> Self {
        Self {
            sink: Sink::Queue(shared),
            job_id,
            attempt,
        }
    }

    /// A reporter that forwards every signal to `f`. Useful for driving a
    /// transport outside the queue.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(ProgressSignal) + Send + Sync + 'static,
    {
        Self {
            sink: Sink::Callback(Arc::new(f)),
            job_id: JobId::nil(),
            attempt: 0,
        }
    }

    /// A reporter that discards everything.
    pub fn detached() -> Self {
        Self {
            sink: Sink::Detached,
            job_id: JobId::nil(),
            attempt: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report upload progress. A value of 100 or more marks the payload as
    /// fully sent, the same as [`transmitted`](Self::transmitted).
    pub fn report(&self, percent: u32) {
        self.send(ProgressSignal::Percent(percent));
    }

    /// Signal that the payload has been fully sent.
    pub fn transmitted(&self) {
        self.send(ProgressSignal::Transmitted);
    }

    fn send(&self, signal: ProgressSignal) {
        match &self.sink {
            Sink::Queue(shared) => {
                if let Some(shared) = shared.upgrade() {
                    shared.apply_signal(self.job_id, self.attempt, signal);
                }
            }
            Sink::Callback(f) => f(signal),
            Sink::Detached => {}
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match self.sink {
            Sink::Queue(_) => "queue",
            Sink::Callback(_) => "callback",
            Sink::Detached => "detached",
        };
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("sink", &sink)
            .finish()
    }
}
