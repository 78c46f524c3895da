//! Shared helpers for pipeline integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reelflow_core::{
    AllocationError, JobId, OrchestratorConfig, ResourceAllocator, TransportError, UploadItem,
};
use reelflow_pipeline::{
    Orchestrator, ProgressReporter, QueueSnapshot, TransferReceipt, TransferRequest, TransportPort,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// One `execute` call, handed to the test so it can decide the outcome.
pub struct Call {
    pub job_id: JobId,
    pub attempt: u32,
    pub name: String,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
    reply: oneshot::Sender<Result<TransferReceipt, TransportError>>,
}

impl Call {
    pub fn succeed(self) {
        let receipt = TransferReceipt::with_remote_ref(format!("remote-{}", self.name));
        let _ = self.reply.send(Ok(receipt));
    }

    pub fn fail(self, message: &str) {
        let _ = self.reply.send(Err(TransportError::Failed(message.to_string())));
    }
}

/// Transport whose every call is answered by the test.
pub struct ScriptedTransport {
    calls: mpsc::UnboundedSender<Call>,
    /// When false, cancellation is ignored and only a reply ends the call.
    honour_cancel: bool,
    pub started: AtomicUsize,
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        Self::build(true)
    }

    pub fn ignoring_cancel() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        Self::build(false)
    }

    fn build(honour_cancel: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            calls: tx,
            honour_cancel,
            started: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the running counter however the call ends, including when the
/// scheduler drops the future.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportPort for ScriptedTransport {
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let (reply, rx) = oneshot::channel();
        self.calls
            .send(Call {
                job_id: request.job_id,
                attempt: request.attempt,
                name: request.item.name.clone(),
                progress,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| TransportError::Failed("test harness gone".into()))?;

        if self.honour_cancel {
            tokio::select! {
                reply = rx => reply.unwrap_or(Err(TransportError::Failed("reply dropped".into()))),
                _ = cancel.cancelled() => Err(TransportError::Aborted),
            }
        } else {
            rx.await
                .unwrap_or(Err(TransportError::Failed("reply dropped".into())))
        }
    }
}

/// Wait for the next transport call.
pub async fn next_call(calls: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    tokio::time::timeout(WAIT, calls.recv())
        .await
        .expect("timed out waiting for a transport call")
        .expect("transport channel closed")
}

/// Assert no transport call arrives within a short window.
pub async fn assert_no_call(calls: &mut mpsc::UnboundedReceiver<Call>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), calls.recv()).await;
    assert!(outcome.is_err(), "unexpected transport call");
}

// ---------------------------------------------------------------------------
// Auto transport
// ---------------------------------------------------------------------------

/// Transport that finishes on its own after a short delay. Items whose name
/// contains `fail` are rejected.
#[derive(Default)]
pub struct AutoTransport {
    running: AtomicUsize,
    pub peak: AtomicUsize,
}

#[async_trait]
impl TransportPort for AutoTransport {
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        _cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        for percent in [25, 50, 75] {
            tokio::time::sleep(Duration::from_millis(2)).await;
            progress.report(percent);
        }
        progress.transmitted();
        tokio::time::sleep(Duration::from_millis(2)).await;

        if request.item.name.contains("fail") {
            Err(TransportError::Failed("rejected by remote".into()))
        } else {
            Ok(TransferReceipt::default())
        }
    }
}

// ---------------------------------------------------------------------------
// Counting allocator
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingAllocator {
    allocated: AtomicUsize,
    released: AtomicUsize,
    released_uris: Mutex<Vec<String>>,
}

impl CountingAllocator {
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn released_uris(&self) -> Vec<String> {
        self.released_uris.lock().unwrap().clone()
    }
}

impl ResourceAllocator for CountingAllocator {
    fn allocate(&self, item: &UploadItem) -> Result<String, AllocationError> {
        let n = self.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mem://{n}/{}", item.name))
    }

    fn release(&self, uri: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.released_uris.lock().unwrap().push(uri.to_string());
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn config(concurrency_limit: usize) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_concurrency_limit(concurrency_limit)
        .with_cancel_grace(Duration::from_millis(200))
}

/// Orchestrator wired to a counting allocator.
pub fn orchestrator(
    config: OrchestratorConfig,
    transport: Arc<dyn TransportPort>,
) -> (Orchestrator, Arc<CountingAllocator>) {
    let allocator = Arc::new(CountingAllocator::default());
    let orchestrator = Orchestrator::builder(config, transport)
        .with_allocator(allocator.clone())
        .build()
        .expect("valid config");
    (orchestrator, allocator)
}

/// `count` small inline clips named `clip-0.mp4`, `clip-1.mp4`, ...
pub fn clips(count: usize) -> Vec<UploadItem> {
    (0..count)
        .map(|i| UploadItem::inline(format!("clip-{i}.mp4"), vec![0u8; 16]))
        .collect()
}

pub fn clip(name: &str) -> UploadItem {
    UploadItem::inline(name, vec![0u8; 16])
}

/// Wait until the queue has no executing job and no pending hook.
pub async fn drained(orchestrator: &Orchestrator) {
    tokio::time::timeout(WAIT, orchestrator.wait_until_drained())
        .await
        .expect("queue did not drain");
}

/// Poll snapshots until `predicate` holds.
pub async fn eventually<F>(orchestrator: &Orchestrator, predicate: F) -> QueueSnapshot
where
    F: Fn(&QueueSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = orchestrator.snapshot();
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached; last snapshot: {:?}",
            snapshot.stats
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
