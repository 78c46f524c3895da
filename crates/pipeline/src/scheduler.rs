//! Bounded-concurrency execution of queued jobs.
//!
//! All queue state lives in one [`QueueState`] behind a `std::sync::Mutex`
//! that is never held across an `.await`. Admission, slot release and the
//! next admission happen inside the same critical section, so the number of
//! executing jobs never exceeds the concurrency limit.
//!
//! Each admitted job runs in its own task on a [`TaskTracker`]. The task
//! races the transport against the job's cancellation token and the
//! optional per-job timeout. After an interruption the transport gets
//! `cancel_grace` to return before its future is dropped.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use reelflow_core::{
    aggregate, ItemPolicy, Job, JobError, JobId, JobStatus, OrchestratorConfig, Outcome,
    QueueStats, ResourceAllocator, Trigger,
};
use reelflow_events::{EventBus, QueueEvent, QueueEventKind};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::hooks::{CompletedUpload, CompletionHook, HookFailure};
use crate::transport::{ProgressReporter, ProgressSignal, TransferReceipt, TransferRequest, TransportPort};

/// Mutable queue state. Only touched under [`Shared::lock`].
#[derive(Default)]
pub(crate) struct QueueState {
    /// Insertion ordered; admission walks it front to back.
    pub(crate) jobs: IndexMap<JobId, Job>,
    pub(crate) running: bool,
    /// Execution slots taken by tasks that have not exited yet.
    pub(crate) active_slots: usize,
    /// Completion hooks that are still running.
    pub(crate) pending_hooks: usize,
    /// Only for jobs still in `jobs`; dropped when the job leaves.
    pub(crate) hook_failures: Vec<HookFailure>,
}

impl QueueState {
    /// Take `id` out of the job set along with its hook failures.
    pub(crate) fn remove_job(&mut self, id: JobId) -> Option<Job> {
        self.hook_failures.retain(|f| f.job_id != id);
        self.jobs.shift_remove(&id)
    }
}

/// State shared between the facade and the job tasks.
pub(crate) struct Shared {
    pub(crate) config: OrchestratorConfig,
    pub(crate) policy: Arc<dyn ItemPolicy>,
    pub(crate) allocator: Arc<dyn ResourceAllocator>,
    pub(crate) transport: Arc<dyn TransportPort>,
    pub(crate) hook: Option<Arc<dyn CompletionHook>>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) state: Mutex<QueueState>,
    pub(crate) stats_tx: watch::Sender<QueueStats>,
    pub(crate) drained: Notify,
    pub(crate) tracker: TaskTracker,
    /// Master token; every job token is a child of it.
    pub(crate) cancel: CancellationToken,
    /// Runtime captured by `start()`, used for every later spawn.
    pub(crate) runtime: OnceLock<Handle>,
}

/// A job that has been admitted and needs a task.
pub(crate) struct Launch {
    request: TransferRequest,
    cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, job_id: JobId, kind: QueueEventKind) {
        self.events.publish(QueueEvent::new(job_id, kind));
    }

    /// Capture the current runtime for spawning job tasks.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub(crate) fn bind_runtime(&self) {
        self.runtime.get_or_init(Handle::current);
    }

    /// No job is executing and no completion hook is pending.
    pub(crate) fn is_idle(&self) -> bool {
        let state = self.lock();
        state.active_slots == 0 && state.pending_hooks == 0
    }

    // ---- admission ----

    /// Admit queued jobs in insertion order until every slot is taken.
    pub(crate) fn admit(&self, state: &mut QueueState) -> Vec<Launch> {
        let mut launches = Vec::new();
        if !state.running {
            return launches;
        }

        let limit = self.config.concurrency_limit;
        let QueueState {
            jobs, active_slots, ..
        } = state;

        for job in jobs.values_mut() {
            if *active_slots >= limit {
                break;
            }
            if !job.is_admissible() {
                continue;
            }
            if let Err(e) = job.apply(Trigger::Admit) {
                tracing::warn!(job_id = %job.id(), error = %e, "Skipping job at admission");
                continue;
            }
            job.set_in_flight(true);
            *active_slots += 1;

            let attempt = job.attempts();
            tracing::debug!(job_id = %job.id(), attempt, active = *active_slots, "Job admitted");
            self.publish(job.id(), QueueEventKind::Admitted { attempt });

            launches.push(Launch {
                request: TransferRequest {
                    job_id: job.id(),
                    attempt,
                    item: job.item().clone(),
                    preview_uri: job.resource().uri().map(str::to_owned),
                },
                cancel: job.cancel_token().clone(),
            });
        }

        launches
    }

    /// Spawn a task for every launch.
    pub(crate) fn launch(self: &Arc<Self>, launches: Vec<Launch>) {
        if launches.is_empty() {
            return;
        }
        let Some(runtime) = self.runtime.get() else {
            tracing::error!(count = launches.len(), "No runtime bound; jobs cannot be launched");
            return;
        };
        for launch in launches {
            self.tracker
                .spawn_on(execute_job(Arc::clone(self), launch), runtime);
        }
    }

    /// Admit whatever fits, then launch it. Used after operations that
    /// create queued jobs while the queue is running.
    pub(crate) fn pump(self: &Arc<Self>) {
        let launches = {
            let mut state = self.lock();
            let launches = self.admit(&mut state);
            self.settle(&mut state);
            launches
        };
        self.launch(launches);
    }

    /// Publish derived state after a mutation. Call before releasing the lock.
    pub(crate) fn settle(&self, state: &mut QueueState) {
        let stats = aggregate(state.jobs.values().map(Job::status));
        self.stats_tx.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        });

        if state.active_slots == 0 && state.running {
            state.running = false;
            tracing::info!(
                completed = stats.completed,
                failed = stats.failed,
                queued = stats.queued,
                "Queue drained",
            );
        }

        if state.active_slots == 0 && state.pending_hooks == 0 {
            self.drained.notify_waiters();
        }
    }

    // ---- transport callbacks ----

    pub(crate) fn apply_signal(&self, job_id: JobId, attempt: u32, signal: ProgressSignal) {
        let mut state = self.lock();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return;
        };
        // Superseded attempt.
        if job.attempts() != attempt || !job.is_in_flight() {
            return;
        }

        let trigger = match signal {
            ProgressSignal::Percent(percent) => Trigger::Progress(percent),
            ProgressSignal::Transmitted => Trigger::Transmitted,
        };

        match job.apply(trigger) {
            Ok(Outcome::Progressed(percent)) => {
                tracing::debug!(%job_id, attempt, percent, "Upload progress");
                self.publish(job_id, QueueEventKind::Progress { percent });
            }
            Ok(Outcome::Moved { .. }) => {
                tracing::info!(%job_id, attempt, "Upload transmitted, processing");
                self.publish(job_id, QueueEventKind::Processing);
                self.settle(&mut state);
            }
            Ok(Outcome::Discarded) => {
                tracing::trace!(%job_id, attempt, ?signal, "Progress report discarded");
            }
            Err(e) => {
                tracing::debug!(%job_id, attempt, error = %e, "Ignoring transport signal");
            }
        }
    }

    // ---- completion ----

    /// Record the attempt's result, free its slot and admit the next jobs
    /// in one critical section, then run the completion hook.
    async fn finish(
        self: &Arc<Self>,
        job_id: JobId,
        attempt: u32,
        result: Result<TransferReceipt, JobError>,
    ) {
        let (completed, launches) = {
            let mut state = self.lock();
            state.active_slots = state.active_slots.saturating_sub(1);
            let completed = self.record_result(&mut state, job_id, attempt, result);
            if completed.is_some() {
                state.pending_hooks += 1;
            }
            let launches = self.admit(&mut state);
            self.settle(&mut state);
            (completed, launches)
        };
        self.launch(launches);

        let Some(upload) = completed else {
            return;
        };
        let failure = self.run_hook(&upload).await;

        let mut state = self.lock();
        state.pending_hooks = state.pending_hooks.saturating_sub(1);
        // The job may have been removed while its hook ran.
        if let Some(failure) = failure.filter(|f| state.jobs.contains_key(&f.job_id)) {
            state.hook_failures.push(failure);
        }
        self.settle(&mut state);
    }

    fn record_result(
        &self,
        state: &mut QueueState,
        job_id: JobId,
        attempt: u32,
        result: Result<TransferReceipt, JobError>,
    ) -> Option<CompletedUpload> {
        let Some(job) = state.jobs.get_mut(&job_id) else {
            tracing::debug!(%job_id, attempt, "Finished job is no longer queued");
            return None;
        };
        if job.attempts() != attempt {
            return None;
        }
        job.set_in_flight(false);

        match result {
            Ok(receipt) => {
                if job.status() == JobStatus::Uploading && job.apply(Trigger::Transmitted).is_ok() {
                    self.publish(job_id, QueueEventKind::Processing);
                }
                match job.apply(Trigger::Processed) {
                    Ok(outcome) if outcome.fires_completion_hook() => {
                        tracing::info!(%job_id, attempt, name = %job.item().name, "Upload completed");
                        self.publish(job_id, QueueEventKind::Completed);
                        Some(CompletedUpload {
                            job_id,
                            attempt,
                            item: job.item().clone(),
                            preview_uri: job.resource().uri().map(str::to_owned),
                            receipt,
                            completed_at: Utc::now(),
                        })
                    }
                    Ok(_) => None,
                    Err(e) => {
                        // Cancelled while the transport was finishing.
                        tracing::debug!(%job_id, attempt, error = %e, "Discarding late completion");
                        None
                    }
                }
            }
            Err(error) => {
                if !job.status().is_active() {
                    return None;
                }
                if matches!(error, JobError::Cancelled | JobError::Timeout) && job.release_resource() {
                    tracing::debug!(%job_id, "Preview released after interruption");
                }
                tracing::warn!(%job_id, attempt, error = %error, "Upload failed");
                match job.apply(Trigger::Fail(error.clone())) {
                    Ok(_) => self.publish(job_id, QueueEventKind::Failed { error }),
                    Err(e) => tracing::debug!(%job_id, error = %e, "Failure not recorded"),
                }
                None
            }
        }
    }

    async fn run_hook(&self, upload: &CompletedUpload) -> Option<HookFailure> {
        let hook = self.hook.as_ref()?;
        let error = hook.on_completed(upload).await.err()?;

        tracing::error!(job_id = %upload.job_id, error = %error, "Completion hook failed");
        self.publish(
            upload.job_id,
            QueueEventKind::HookFailed {
                message: error.0.clone(),
            },
        );
        Some(HookFailure {
            job_id: upload.job_id,
            name: upload.item.name.clone(),
            message: error.0,
            failed_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Job task
// ---------------------------------------------------------------------------

async fn execute_job(shared: Arc<Shared>, launch: Launch) {
    let Launch { request, cancel } = launch;
    let job_id = request.job_id;
    let attempt = request.attempt;
    let reporter = ProgressReporter::attached(Arc::downgrade(&shared), job_id, attempt);

    tracing::info!(%job_id, attempt, name = %request.item.name, "Upload started");
    let result = run_transfer(&shared, request, reporter, &cancel).await;
    shared.finish(job_id, attempt, result).await;
}

async fn run_transfer(
    shared: &Shared,
    request: TransferRequest,
    reporter: ProgressReporter,
    cancel: &CancellationToken,
) -> Result<TransferReceipt, JobError> {
    let job_id = request.job_id;
    let mut transfer = shared.transport.execute(request, reporter, cancel.clone());
    let deadline = expire_after(shared.config.job_timeout());
    tokio::pin!(deadline);

    let interruption = tokio::select! {
        result = &mut transfer => {
            return result.map_err(|e| {
                if cancel.is_cancelled() {
                    JobError::Cancelled
                } else {
                    JobError::from(e)
                }
            });
        }
        _ = cancel.cancelled() => JobError::Cancelled,
        _ = &mut deadline => {
            tracing::warn!(%job_id, "Upload timed out");
            cancel.cancel();
            JobError::Timeout
        }
    };

    let grace = shared.config.cancel_grace();
    match tokio::time::timeout(grace, &mut transfer).await {
        Ok(_) => tracing::debug!(%job_id, "Transport acknowledged cancellation"),
        Err(_) => tracing::warn!(
            %job_id,
            grace_ms = grace.as_millis() as u64,
            "Transport ignored cancellation, dropping it",
        ),
    }
    Err(interruption)
}

async fn expire_after(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
