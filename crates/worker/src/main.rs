//! `reelflow-worker` -- batch media ingestion.
//!
//! Scans an ingest directory and/or a list of remote source links, uploads
//! every accepted item through the bounded upload queue, retries failures,
//! writes a metadata record per completed upload and prints the final queue
//! snapshot as JSON on stdout.
//!
//! # Environment variables
//!
//! | Variable                    | Required | Default          | Description                          |
//! |-----------------------------|----------|------------------|--------------------------------------|
//! | `INGEST_DIR`                | one of   | --               | Directory of files to ingest         |
//! | `INGEST_SOURCES`            | one of   | --               | File of source URLs, one per line    |
//! | `INGEST_LIBRARY`            | no       | `any`            | footage, images, audio, overlays, any |
//! | `INGEST_METADATA_OUT`       | no       | --               | JSONL file for metadata records      |
//! | `INGEST_RETRY_ROUNDS`       | no       | `1`              | Retry rounds for failed uploads      |
//! | `REELFLOW_CONCURRENCY`      | no       | `5`              | Uploads running at once              |
//! | `REELFLOW_MAX_OUTSTANDING`  | no       | `100`            | Queue capacity                       |
//! | `REELFLOW_CAPACITY_POLICY`  | no       | `accept_partial` | accept_partial or reject_batch       |
//! | `REELFLOW_JOB_TIMEOUT_SECS` | no       | --               | Per-upload deadline                  |
//! | `REELFLOW_CANCEL_GRACE_MS`  | no       | `5000`           | Wait for a cancelled upload to stop  |
//! | `SIM_*`                     | no       | see settings     | Simulated transport behaviour        |

use anyhow::Context;
use reelflow_core::OrchestratorConfig;
use reelflow_worker::{ingest, WorkerSettings};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelflow_worker=info,reelflow_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = WorkerSettings::from_env().context("Invalid worker settings")?;
    let queue_config = OrchestratorConfig::from_env().context("Invalid queue configuration")?;

    tracing::info!(
        ingest_dir = ?settings.ingest_dir,
        sources = ?settings.sources_file,
        library = ?settings.library,
        concurrency = queue_config.concurrency_limit,
        "Starting reelflow-worker",
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received");
            ctrl_c.cancel();
        }
    });

    let summary = ingest::run(&settings, queue_config, shutdown)
        .await
        .context("Ingestion failed")?;

    println!("{}", summary.snapshot_json()?);

    if summary.failed() > 0 {
        tracing::warn!(failed = summary.failed(), "Some uploads failed");
    }
    Ok(())
}
