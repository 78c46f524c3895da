//! The public face of the upload queue.
//!
//! [`Orchestrator`] owns the job set and exposes the operations a UI layer or
//! batch driver needs: add items, start, cancel, retry, remove, clear and
//! observe. It is a cheap handle; clones share the same queue.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reelflow_core::{
    AllocationError, AllowAll, CapacityPolicy, CoreError, ItemPolicy, Job, JobError, JobId,
    JobStatus, JobView, OrchestratorConfig, PreviewAllocator, QueueStats, RejectReason,
    ResourceAllocator, ResourceHandle, Trigger, UploadItem,
};
use reelflow_events::{EventBus, QueueEvent, QueueEventKind};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::hooks::CompletionHook;
use crate::scheduler::{QueueState, Shared};
use crate::snapshot::QueueSnapshot;
use crate::transport::TransportPort;

/// Extra time `shutdown` allows on top of the cancel grace.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// An item `add` did not turn into a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    /// Position of the item in the batch passed to `add`.
    pub index: usize,
    pub name: String,
    pub reason: RejectReason,
}

/// Result of one `add` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReport {
    /// Ids of the created jobs, in batch order.
    pub accepted: Vec<JobId>,
    pub rejected: Vec<RejectedItem>,
}

impl AddReport {
    pub fn all_accepted(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Items turned away because the queue was full.
    pub fn skipped(&self) -> impl Iterator<Item = &RejectedItem> {
        self.rejected
            .iter()
            .filter(|r| matches!(r.reason, RejectReason::CapacityExceeded { .. }))
    }
}

/// What `cancel_one` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was still queued and has been removed.
    Removed,
    /// The job was executing; it is now `failed(Cancelled)`.
    Cancelled,
    /// The job was already completed or failed. Nothing changed.
    AlreadyFinished,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`Orchestrator`].
///
/// Defaults: every item allowed ([`AllowAll`]), in-memory
/// [`PreviewAllocator`], no completion hook, private event bus.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    transport: Arc<dyn TransportPort>,
    policy: Arc<dyn ItemPolicy>,
    allocator: Arc<dyn ResourceAllocator>,
    hook: Option<Arc<dyn CompletionHook>>,
    events: Option<Arc<EventBus>>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig, transport: Arc<dyn TransportPort>) -> Self {
        Self {
            config,
            transport,
            policy: Arc::new(AllowAll),
            allocator: Arc::new(PreviewAllocator::new()),
            hook: None,
            events: None,
        }
    }

    /// Item check applied by `add` before a job is created.
    pub fn with_policy(mut self, policy: impl ItemPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn ResourceAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Publish queue events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and create the orchestrator.
    pub fn build(self) -> Result<Orchestrator, CoreError> {
        let config = self.config.validated()?;
        let (stats_tx, _) = watch::channel(QueueStats::default());

        let shared = Shared {
            config,
            policy: self.policy,
            allocator: self.allocator,
            transport: self.transport,
            hook: self.hook,
            events: self.events.unwrap_or_default(),
            state: std::sync::Mutex::new(QueueState::default()),
            stats_tx,
            drained: Notify::new(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            runtime: OnceLock::new(),
        };

        Ok(Orchestrator {
            shared: Arc::new(shared),
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Bounded-concurrency upload queue.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig, transport: Arc<dyn TransportPort>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config, transport)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Create a queued job for every acceptable item.
    ///
    /// Each item is checked against the item policy and the outstanding-job
    /// capacity, then gets a preview handle. Items that fail any step are
    /// listed in [`AddReport::rejected`] with the reason. When the queue is
    /// running, new jobs take free slots immediately.
    pub fn add<I>(&self, items: I) -> AddReport
    where
        I: IntoIterator<Item = UploadItem>,
    {
        let shared = &self.shared;
        let checked: Vec<(UploadItem, Result<(), AllocationError>)> = items
            .into_iter()
            .map(|item| {
                let verdict = shared.policy.check(&item);
                (item, verdict)
            })
            .collect();

        let mut report = AddReport::default();
        let max_outstanding = shared.config.max_outstanding;

        let launches = {
            let mut state = shared.lock();
            let outstanding = state
                .jobs
                .values()
                .filter(|job| job.status() != JobStatus::Completed)
                .count();
            let mut room = max_outstanding.saturating_sub(outstanding);
            let eligible = checked.iter().filter(|(_, verdict)| verdict.is_ok()).count();
            let batch_fits = match shared.config.capacity_policy {
                CapacityPolicy::AcceptPartial => true,
                CapacityPolicy::RejectBatch => eligible <= room,
            };

            for (index, (item, verdict)) in checked.into_iter().enumerate() {
                let name = item.name.clone();
                let allocated = verdict.map_err(RejectReason::Allocation).and_then(|()| {
                    if !batch_fits || room == 0 {
                        return Err(RejectReason::CapacityExceeded { max_outstanding });
                    }
                    ResourceHandle::allocate(&shared.allocator, &item).map_err(RejectReason::Allocation)
                });

                match allocated {
                    Ok(resource) => {
                        room -= 1;
                        let job = Job::new(item, resource, &shared.cancel);
                        let job_id = job.id();
                        shared.publish(job_id, QueueEventKind::Added { name });
                        state.jobs.insert(job_id, job);
                        report.accepted.push(job_id);
                    }
                    Err(reason) => {
                        tracing::info!(index, name = %name, reason = %reason, "Item rejected");
                        report.rejected.push(RejectedItem {
                            index,
                            name,
                            reason,
                        });
                    }
                }
            }

            let launches = shared.admit(&mut state);
            shared.settle(&mut state);
            launches
        };
        shared.launch(launches);

        tracing::info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "Items added",
        );
        report
    }

    /// Begin admitting queued jobs. Returns how many were admitted.
    ///
    /// No-op while already running or when nothing is queued. The queue
    /// stops running by itself once no job is executing, so a later batch
    /// or a retry needs another `start()`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) -> usize {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            tracing::warn!("start() called after shutdown, ignoring");
            return 0;
        }
        shared.bind_runtime();

        let launches = {
            let mut state = shared.lock();
            if state.running {
                tracing::debug!("Queue already running");
                return 0;
            }
            if !state.jobs.values().any(|job| job.status() == JobStatus::Queued) {
                tracing::debug!("Nothing queued, not starting");
                return 0;
            }
            state.running = true;
            let launches = shared.admit(&mut state);
            shared.settle(&mut state);
            launches
        };

        let admitted = launches.len();
        tracing::info!(
            admitted,
            concurrency_limit = shared.config.concurrency_limit,
            "Queue started",
        );
        shared.launch(launches);
        admitted
    }

    /// Cancel a single job.
    ///
    /// A queued job is removed without ever reaching the transport. An
    /// executing job has its token cancelled, is marked `failed(Cancelled)`
    /// and loses its preview right away; its slot frees up once the
    /// transport returns or the cancel grace runs out.
    pub fn cancel_one(&self, id: JobId) -> Result<CancelOutcome, CoreError> {
        let shared = &self.shared;
        let mut state = shared.lock();
        let outcome = self.cancel_locked(&mut state, id)?;
        shared.settle(&mut state);
        Ok(outcome)
    }

    /// Cancel every job that is queued or executing. Returns how many were
    /// cancelled or removed.
    pub fn cancel_all(&self) -> usize {
        let shared = &self.shared;
        let mut state = shared.lock();
        let ids: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| !job.status().is_terminal())
            .map(Job::id)
            .collect();

        let mut cancelled = 0;
        for id in ids {
            match self.cancel_locked(&mut state, id) {
                Ok(CancelOutcome::AlreadyFinished) => {}
                Ok(_) => cancelled += 1,
                Err(e) => tracing::warn!(job_id = %id, error = %e, "Cancel failed"),
            }
        }
        shared.settle(&mut state);

        tracing::info!(cancelled, "All jobs cancelled");
        cancelled
    }

    fn cancel_locked(&self, state: &mut QueueState, id: JobId) -> Result<CancelOutcome, CoreError> {
        let shared = &self.shared;
        let status = state
            .jobs
            .get(&id)
            .map(Job::status)
            .ok_or_else(|| CoreError::job_not_found(id))?;

        match status {
            JobStatus::Queued => {
                if let Some(mut job) = state.remove_job(id) {
                    job.signal_cancel();
                    job.release_resource();
                }
                tracing::info!(job_id = %id, "Queued job removed");
                shared.publish(id, QueueEventKind::Removed);
                Ok(CancelOutcome::Removed)
            }
            JobStatus::Uploading | JobStatus::Processing => {
                let Some(job) = state.jobs.get_mut(&id) else {
                    return Err(CoreError::job_not_found(id));
                };
                job.signal_cancel();
                job.apply(Trigger::Fail(JobError::Cancelled))?;
                job.release_resource();
                tracing::info!(job_id = %id, attempt = job.attempts(), "Upload cancelled");
                shared.publish(
                    id,
                    QueueEventKind::Failed {
                        error: JobError::Cancelled,
                    },
                );
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Completed | JobStatus::Failed => Ok(CancelOutcome::AlreadyFinished),
        }
    }

    /// Put every failed job back in the queue.
    ///
    /// Progress and error are cleared and a fresh cancellation token is
    /// issued. A preview released by cancellation is allocated again; if that
    /// fails the job stays failed. This does not start the queue, but when
    /// it is already running the requeued jobs are admitted as slots allow.
    pub fn retry_failed(&self) -> Vec<JobId> {
        let shared = &self.shared;
        let mut requeued = Vec::new();
        {
            let mut state = shared.lock();
            for job in state.jobs.values_mut() {
                if job.status() != JobStatus::Failed {
                    continue;
                }
                if let Err(e) = job.reacquire_resource() {
                    tracing::warn!(job_id = %job.id(), error = %e, "Preview unavailable, job left failed");
                    continue;
                }
                match job.apply(Trigger::Retry) {
                    Ok(_) => {
                        shared.publish(job.id(), QueueEventKind::Requeued);
                        requeued.push(job.id());
                    }
                    Err(e) => tracing::warn!(job_id = %job.id(), error = %e, "Retry rejected"),
                }
            }
            shared.settle(&mut state);
        }

        tracing::info!(count = requeued.len(), "Failed jobs requeued");
        shared.pump();
        requeued
    }

    /// Remove a queued or finished job. Executing jobs must be cancelled
    /// first.
    pub fn remove(&self, id: JobId) -> Result<(), CoreError> {
        let shared = &self.shared;
        let mut state = shared.lock();
        let status = state
            .jobs
            .get(&id)
            .map(Job::status)
            .ok_or_else(|| CoreError::job_not_found(id))?;

        if status.is_active() {
            return Err(CoreError::Conflict(format!(
                "Job {id} is {status}; cancel it before removing"
            )));
        }

        if let Some(mut job) = state.remove_job(id) {
            job.signal_cancel();
            job.release_resource();
        }
        shared.publish(id, QueueEventKind::Removed);
        shared.settle(&mut state);
        tracing::info!(job_id = %id, %status, "Job removed");
        Ok(())
    }

    /// Cancel executing jobs, release every preview and empty the queue.
    /// Returns how many jobs were removed.
    pub fn clear(&self) -> usize {
        let shared = &self.shared;
        let mut state = shared.lock();
        let removed = state.jobs.len();

        for (id, mut job) in state.jobs.drain(..) {
            job.signal_cancel();
            job.release_resource();
            shared.publish(id, QueueEventKind::Removed);
        }
        state.hook_failures.clear();
        state.running = false;
        shared.settle(&mut state);

        tracing::info!(removed, "Queue cleared");
        removed
    }

    /// Consistent copy of the whole queue.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::capture(&self.shared.lock())
    }

    pub fn get(&self, id: JobId) -> Option<JobView> {
        self.shared.lock().jobs.get(&id).map(Job::view)
    }

    pub fn stats(&self) -> QueueStats {
        *self.shared.stats_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Receive a [`QueueEvent`] for every job change.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// Receive aggregate statistics whenever they change.
    pub fn watch_stats(&self) -> watch::Receiver<QueueStats> {
        self.shared.stats_tx.subscribe()
    }

    /// Resolve once no job is executing and no completion hook is pending.
    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Tear the queue down.
    ///
    /// Cancels every job through the master token, releases every preview
    /// and waits for the job tasks to exit. The orchestrator cannot be
    /// started again afterwards.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        tracing::info!("Shutting down upload queue");
        shared.cancel.cancel();

        {
            let mut state = shared.lock();
            state.running = false;
            let released = state
                .jobs
                .values_mut()
                .map(|job| job.release_resource())
                .filter(|released| *released)
                .count();
            shared.settle(&mut state);
            tracing::debug!(released, "Previews released");
        }

        shared.tracker.close();
        let bound = shared.config.cancel_grace() + SHUTDOWN_MARGIN;
        if tokio::time::timeout(bound, shared.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = shared.tracker.len(),
                "Job tasks still running after shutdown wait",
            );
        }

        tracing::info!("Upload queue shut down");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
