//! A transport that pretends to upload.
//!
//! Progress advances by a fixed step on every tick, then the upload sits in
//! a fixed processing wait before it succeeds or (at the configured rate)
//! fails. Cancellation is honoured at every wait.

use async_trait::async_trait;
use rand::Rng;
use reelflow_core::TransportError;
use reelflow_pipeline::{ProgressReporter, TransferReceipt, TransferRequest, TransportPort};
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::settings::SimulationSettings;

#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    settings: SimulationSettings,
}

impl SimulatedTransport {
    pub fn new(settings: SimulationSettings) -> Self {
        Self { settings }
    }

    fn roll_failure(&self) -> bool {
        self.settings.failure_rate > 0.0 && rand::rng().random_bool(self.settings.failure_rate)
    }
}

#[async_trait]
impl TransportPort for SimulatedTransport {
    async fn execute(
        &self,
        request: TransferRequest,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransportError> {
        let step = self.settings.step_percent.max(1);
        let mut ticker = tokio::time::interval(self.settings.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut sent = 0u32;
        while sent < 100 {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Aborted),
                _ = ticker.tick() => {}
            }
            sent = (sent + step).min(100);
            progress.report(sent);
        }
        progress.transmitted();

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
            _ = tokio::time::sleep(self.settings.processing()) => {}
        }

        if self.roll_failure() {
            return Err(TransportError::Failed(format!(
                "Simulated ingest failure for '{}'",
                request.item.name
            )));
        }

        tracing::debug!(job_id = %request.job_id, attempt = request.attempt, "Simulated upload finished");
        Ok(TransferReceipt {
            remote_ref: Some(format!("sim-{}", request.job_id)),
            details: json!({
                "size_bytes": request.item.size_bytes,
                "media_kind": request.item.media_kind(),
                "attempt": request.attempt,
            }),
        })
    }
}
