//! Queue configuration.
//!
//! [`OrchestratorConfig`] is built in code with the `with_*` builders or
//! loaded from `REELFLOW_*` environment variables, and is checked with
//! `validator` before an orchestrator accepts it.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Default number of jobs executing at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// Default ceiling on jobs that are not yet completed.
pub const DEFAULT_MAX_OUTSTANDING: usize = 100;

/// Default wait for a transport to acknowledge cancellation before the
/// operation is dropped.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 5_000;

/// Upper bound on the concurrency limit.
pub const MAX_CONCURRENCY_LIMIT: usize = 64;

/// What `add` does with a batch that does not fit under `max_outstanding`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Accept items up to the remaining capacity, report the rest as skipped.
    #[default]
    AcceptPartial,
    /// Reject the whole batch.
    RejectBatch,
}

impl FromStr for CapacityPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept_partial" | "partial" => Ok(CapacityPolicy::AcceptPartial),
            "reject_batch" | "reject" => Ok(CapacityPolicy::RejectBatch),
            other => Err(CoreError::Validation(format!(
                "Unknown capacity policy '{other}'. Valid policies: accept_partial, reject_batch"
            ))),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Jobs executing at once (N).
    #[validate(range(min = 1, max = MAX_CONCURRENCY_LIMIT))]
    pub concurrency_limit: usize,
    /// Jobs that may be in the set without being completed.
    #[validate(range(min = 1))]
    pub max_outstanding: usize,
    pub capacity_policy: CapacityPolicy,
    /// Per-attempt deadline covering upload and processing. `None` disables it.
    pub job_timeout_ms: Option<u64>,
    pub cancel_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_outstanding: DEFAULT_MAX_OUTSTANDING,
            capacity_policy: CapacityPolicy::default(),
            job_timeout_ms: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default          |
    /// |-----------------------------|------------------|
    /// | `REELFLOW_CONCURRENCY`      | `5`              |
    /// | `REELFLOW_MAX_OUTSTANDING`  | `100`            |
    /// | `REELFLOW_CAPACITY_POLICY`  | `accept_partial` |
    /// | `REELFLOW_JOB_TIMEOUT_SECS` | unset (none)     |
    /// | `REELFLOW_CANCEL_GRACE_MS`  | `5000`           |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let config = Self {
            concurrency_limit: env_parse("REELFLOW_CONCURRENCY")?
                .unwrap_or(defaults.concurrency_limit),
            max_outstanding: env_parse("REELFLOW_MAX_OUTSTANDING")?
                .unwrap_or(defaults.max_outstanding),
            capacity_policy: env_parse("REELFLOW_CAPACITY_POLICY")?
                .unwrap_or(defaults.capacity_policy),
            job_timeout_ms: env_parse::<u64>("REELFLOW_JOB_TIMEOUT_SECS")?
                .map(|secs| secs.saturating_mul(1_000)),
            cancel_grace_ms: env_parse("REELFLOW_CANCEL_GRACE_MS")?
                .unwrap_or(defaults.cancel_grace_ms),
        };

        config.validated()
    }

    /// Run field validation, returning the config unchanged when it passes.
    pub fn validated(self) -> Result<Self, CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(self)
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_max_outstanding(mut self, max: usize) -> Self {
        self.max_outstanding = max;
        self
    }

    pub fn with_capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Parse an optional environment variable, treating empty as unset.
fn env_parse<T>(key: &str) -> Result<Option<T>, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CoreError::Validation(format!("{key}: {e}"))),
        _ => Ok(None),
    }
}
