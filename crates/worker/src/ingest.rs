//! Batch ingestion: collect items, push them through the queue, retry
//! failures and report.

use std::sync::Arc;

use reelflow_core::{JobStatus, OrchestratorConfig, UploadItem};
use reelflow_events::{QueueEvent, QueueEventKind};
use reelflow_pipeline::{AddReport, Orchestrator, QueueSnapshot};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::metadata::{MetadataRecord, MetadataRecordHook};
use crate::scan::{read_sources, scan_dir};
use crate::settings::WorkerSettings;
use crate::simulated::SimulatedTransport;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub report: AddReport,
    pub snapshot: QueueSnapshot,
    pub records: Vec<MetadataRecord>,
    /// Retry rounds actually run.
    pub retry_rounds: u32,
    /// The run was stopped by `shutdown` before the queue drained.
    pub interrupted: bool,
}

impl IngestSummary {
    pub fn failed(&self) -> usize {
        self.snapshot.stats.failed
    }

    /// Final queue snapshot as pretty-printed JSON.
    pub fn snapshot_json(&self) -> Result<String, WorkerError> {
        Ok(serde_json::to_string_pretty(&self.snapshot)?)
    }
}

/// Collect items from every configured source.
pub async fn collect_items(settings: &WorkerSettings) -> Result<Vec<UploadItem>, WorkerError> {
    let mut items = Vec::new();
    if let Some(dir) = &settings.ingest_dir {
        items.extend(scan_dir(dir).await?);
    }
    if let Some(file) = &settings.sources_file {
        items.extend(read_sources(file).await?);
    }
    Ok(items)
}

/// Run one ingestion batch to completion.
///
/// Cancelling `shutdown` stops waiting, tears the queue down and returns
/// whatever state was reached.
pub async fn run(
    settings: &WorkerSettings,
    queue_config: OrchestratorConfig,
    shutdown: CancellationToken,
) -> Result<IngestSummary, WorkerError> {
    let items = collect_items(settings).await?;

    let transport = Arc::new(SimulatedTransport::new(settings.simulation.clone()));
    let hook = Arc::new(MetadataRecordHook::new(settings.metadata_out.clone()));

    let mut builder = Orchestrator::builder(queue_config, transport).with_completion_hook(hook.clone());
    if let Some(allow_list) = settings.library.allow_list() {
        builder = builder.with_policy(allow_list);
    }
    let queue = builder.build()?;

    let logger_cancel = shutdown.child_token();
    let logger = tokio::spawn(log_events(queue.subscribe(), logger_cancel.clone()));

    let report = queue.add(items);
    for rejected in &report.rejected {
        tracing::warn!(
            index = rejected.index,
            name = %rejected.name,
            reason = %rejected.reason,
            "Item skipped",
        );
    }

    queue.start();
    let mut interrupted = !drain_or_shutdown(&queue, &shutdown).await;

    let mut rounds = 0;
    while !interrupted && rounds < settings.retry_rounds && queue.stats().failed > 0 {
        rounds += 1;
        let requeued = queue.retry_failed();
        tracing::info!(round = rounds, count = requeued.len(), "Retrying failed uploads");
        queue.start();
        interrupted = !drain_or_shutdown(&queue, &shutdown).await;
    }

    let snapshot = queue.snapshot();
    queue.shutdown().await;
    logger_cancel.cancel();
    let _ = logger.await;

    let summary = IngestSummary {
        report,
        records: hook.records(),
        snapshot,
        retry_rounds: rounds,
        interrupted,
    };

    tracing::info!(
        completed = summary.snapshot.stats.completed,
        failed = summary.failed(),
        records = summary.records.len(),
        interrupted,
        "Ingestion finished",
    );
    for job in summary.snapshot.with_status(JobStatus::Failed) {
        if let Some(error) = &job.error {
            tracing::warn!(name = %job.name, attempts = job.attempts, error = %error, "Upload left failed");
        }
    }

    Ok(summary)
}

/// Wait for the queue to drain. Returns `false` if shutdown came first.
async fn drain_or_shutdown(queue: &Orchestrator, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = queue.wait_until_drained() => true,
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, stopping ingestion");
            false
        }
    }
}

/// Log queue events until cancelled.
async fn log_events(mut rx: broadcast::Receiver<QueueEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => {
                match received {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

fn log_event(event: &QueueEvent) {
    let job_id = event.job_id;
    match &event.kind {
        QueueEventKind::Progress { percent } => {
            tracing::debug!(%job_id, percent, "Upload progress");
        }
        QueueEventKind::Failed { error } => {
            tracing::info!(%job_id, kind = error.kind(), "Upload failed");
        }
        kind => tracing::debug!(%job_id, event = kind.name(), "Queue event"),
    }
}
