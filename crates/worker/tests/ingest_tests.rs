//! Integration tests for the batch ingestion worker.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use reelflow_core::types::new_job_id;
use reelflow_core::{
    AllocationError, ContentRef, JobStatus, OrchestratorConfig, RejectReason, TransportError,
    UploadItem,
};
use reelflow_pipeline::{ProgressReporter, ProgressSignal, TransferRequest, TransportPort};
use reelflow_worker::metadata::MetadataRecord;
use reelflow_worker::scan::{read_sources, scan_dir};
use reelflow_worker::simulated::SimulatedTransport;
use reelflow_worker::{ingest, Library, SimulationSettings, WorkerError, WorkerSettings};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn fast_simulation(failure_rate: f64) -> SimulationSettings {
    SimulationSettings {
        tick_ms: 1,
        step_percent: 25,
        processing_ms: 1,
        failure_rate,
    }
}

fn write(dir: &Path, name: &str, bytes: usize) {
    std::fs::write(dir.join(name), vec![7u8; bytes]).expect("write fixture");
}

fn request(name: &str) -> TransferRequest {
    TransferRequest {
        job_id: new_job_id(),
        attempt: 1,
        item: UploadItem::inline(name, vec![1u8; 32]),
        preview_uri: None,
    }
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_lists_visible_files_sorted_by_name() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "b-roll.mov", 64);
    write(dir.path(), "a-intro.mp4", 128);
    write(dir.path(), ".DS_Store", 8);
    std::fs::create_dir(dir.path().join("nested")).unwrap();

    let items = scan_dir(dir.path()).await.unwrap();
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["a-intro.mp4", "b-roll.mov"]);
    assert_eq!(items[0].size_bytes, 128);
    assert_matches!(&items[0].content, ContentRef::File(path) if path.ends_with("a-intro.mp4"));
}

#[tokio::test]
async fn scan_of_missing_dir_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert_matches!(scan_dir(&missing).await, Err(WorkerError::Io { .. }));
}

#[tokio::test]
async fn sources_file_yields_remote_items() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("sources.txt");
    std::fs::write(
        &list,
        "# campaign assets\nhttps://cdn.example.com/media/teaser.mp4\n\n  https://cdn.example.com/logo.png?v=2  \n",
    )
    .unwrap();

    let items = read_sources(&list).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "teaser.mp4");
    assert_eq!(items[1].name, "logo.png");
    assert!(items.iter().all(UploadItem::is_remote));
}

// ---------------------------------------------------------------------------
// Simulated transport
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simulated_transport_reports_steps_then_transmits() {
    let transport = SimulatedTransport::new(fast_simulation(0.0));
    let signals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&signals);
    let reporter = ProgressReporter::from_fn(move |signal| sink.lock().unwrap().push(signal));

    let receipt = transport
        .execute(request("intro.mp4"), reporter, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *signals.lock().unwrap(),
        vec![
            ProgressSignal::Percent(25),
            ProgressSignal::Percent(50),
            ProgressSignal::Percent(75),
            ProgressSignal::Percent(100),
            ProgressSignal::Transmitted,
        ]
    );
    assert!(receipt.remote_ref.unwrap().starts_with("sim-"));
    assert_eq!(receipt.details["media_kind"], "video");
}

#[tokio::test]
async fn simulated_transport_stops_on_cancel() {
    let transport = SimulatedTransport::new(SimulationSettings {
        tick_ms: 60_000,
        ..fast_simulation(0.0)
    });
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tokio::time::timeout(
        WAIT,
        transport.execute(request("long.mp4"), ProgressReporter::detached(), cancel),
    )
    .await
    .expect("transport ignored cancellation");
    assert_eq!(result, Err(TransportError::Aborted));
}

#[tokio::test]
async fn simulated_transport_fails_at_full_rate() {
    let transport = SimulatedTransport::new(fast_simulation(1.0));
    let result = transport
        .execute(request("flaky.mp4"), ProgressReporter::detached(), CancellationToken::new())
        .await;
    assert_matches!(result, Err(TransportError::Failed(msg)) if msg.contains("flaky.mp4"));
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

fn settings(dir: &Path, simulation: SimulationSettings, retry_rounds: u32) -> WorkerSettings {
    WorkerSettings {
        ingest_dir: Some(dir.to_path_buf()),
        sources_file: None,
        library: Library::Footage,
        metadata_out: Some(dir.join("records.jsonl")),
        simulation,
        retry_rounds,
    }
}

#[tokio::test]
async fn footage_batch_is_ingested_with_metadata_records() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "intro.mp4", 256);
    write(dir.path(), "outro.mov", 512);
    write(dir.path(), "script.txt", 16);

    let settings = settings(dir.path(), fast_simulation(0.0), 1);
    let config = OrchestratorConfig::default().with_concurrency_limit(2);
    let summary = tokio::time::timeout(WAIT, ingest::run(&settings, config, CancellationToken::new()))
        .await
        .expect("ingestion hung")
        .unwrap();

    assert_eq!(summary.report.accepted.len(), 2);
    assert_eq!(summary.report.rejected.len(), 1);
    assert_eq!(summary.report.rejected[0].name, "script.txt");
    assert_matches!(
        summary.report.rejected[0].reason,
        RejectReason::Allocation(AllocationError::DisallowedType { .. })
    );

    assert_eq!(summary.snapshot.stats.completed, 2);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.retry_rounds, 0);
    assert!(!summary.interrupted);
    assert_eq!(summary.records.len(), 2);

    let lines = std::fs::read_to_string(dir.path().join("records.jsonl")).unwrap();
    let mut written: Vec<MetadataRecord> = lines
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    written.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].name, "intro.mp4");
    assert_eq!(written[0].size_bytes, 256);
    assert!(written[0].remote_ref.as_deref().unwrap().starts_with("sim-"));

    let printed: serde_json::Value = serde_json::from_str(&summary.snapshot_json().unwrap()).unwrap();
    assert_eq!(printed["stats"]["completed"], 2);
    assert_eq!(printed["jobs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn failures_are_retried_for_the_configured_rounds() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.mp4", 32);
    write(dir.path(), "b.mp4", 32);

    let settings = settings(dir.path(), fast_simulation(1.0), 2);
    let summary = tokio::time::timeout(
        WAIT,
        ingest::run(&settings, OrchestratorConfig::default(), CancellationToken::new()),
    )
    .await
    .expect("ingestion hung")
    .unwrap();

    assert_eq!(summary.retry_rounds, 2);
    assert_eq!(summary.failed(), 2);
    assert!(summary.records.is_empty());
    for job in &summary.snapshot.jobs {
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
    }
    assert!(!dir.path().join("records.jsonl").exists());
}

#[tokio::test]
async fn shutdown_interrupts_a_running_batch() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "slow.mp4", 32);

    let simulation = SimulationSettings {
        tick_ms: 60_000,
        ..fast_simulation(0.0)
    };
    let settings = settings(dir.path(), simulation, 0);
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(
        WAIT,
        ingest::run(&settings, OrchestratorConfig::default(), shutdown),
    )
    .await
    .expect("shutdown did not stop ingestion")
    .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.snapshot.stats.completed, 0);
}
