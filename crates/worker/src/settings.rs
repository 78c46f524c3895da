//! Worker settings loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reelflow_core::AllowList;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::WorkerError;

/// Default interval between simulated progress reports.
pub const DEFAULT_TICK_MS: u64 = 200;

/// Default progress added per tick.
pub const DEFAULT_STEP_PERCENT: u32 = 10;

/// Default simulated server-side processing time.
pub const DEFAULT_PROCESSING_MS: u64 = 1_500;

/// Default number of retry rounds for failed uploads.
pub const DEFAULT_RETRY_ROUNDS: u32 = 1;

/// Target library; selects the item allow-list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Library {
    Footage,
    Images,
    Audio,
    Overlays,
    /// No type restriction.
    #[default]
    Any,
}

impl Library {
    /// Allow-list for this library, `None` for [`Library::Any`].
    pub fn allow_list(self) -> Option<AllowList> {
        match self {
            Library::Footage => Some(AllowList::footage()),
            Library::Images => Some(AllowList::images()),
            Library::Audio => Some(AllowList::audio()),
            Library::Overlays => Some(AllowList::overlays()),
            Library::Any => None,
        }
    }
}

impl FromStr for Library {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "footage" | "video" => Ok(Library::Footage),
            "images" | "image" => Ok(Library::Images),
            "audio" => Ok(Library::Audio),
            "overlays" | "overlay" => Ok(Library::Overlays),
            "any" | "all" => Ok(Library::Any),
            other => Err(WorkerError::Config(format!(
                "Unknown library '{other}'. Valid libraries: footage, images, audio, overlays, any"
            ))),
        }
    }
}

/// Behaviour of the simulated transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SimulationSettings {
    pub tick_ms: u64,
    #[validate(range(min = 1, max = 100))]
    pub step_percent: u32,
    pub processing_ms: u64,
    /// Probability in `[0, 1]` that an upload fails after processing.
    #[validate(range(min = 0.0, max = 1.0))]
    pub failure_rate: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            step_percent: DEFAULT_STEP_PERCENT,
            processing_ms: DEFAULT_PROCESSING_MS,
            failure_rate: 0.0,
        }
    }
}

impl SimulationSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn processing(&self) -> Duration {
        Duration::from_millis(self.processing_ms)
    }
}

/// Batch ingestion settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// Directory whose files are ingested.
    pub ingest_dir: Option<PathBuf>,
    /// Text file listing remote source URLs, one per line.
    pub sources_file: Option<PathBuf>,
    pub library: Library,
    /// JSONL file receiving one metadata record per completed upload.
    pub metadata_out: Option<PathBuf>,
    pub simulation: SimulationSettings,
    pub retry_rounds: u32,
}

impl WorkerSettings {
    /// Load settings from environment variables.
    ///
    /// | Env Var               | Default |
    /// |-----------------------|---------|
    /// | `INGEST_DIR`          | --      |
    /// | `INGEST_SOURCES`      | --      |
    /// | `INGEST_LIBRARY`      | `any`   |
    /// | `INGEST_METADATA_OUT` | --      |
    /// | `INGEST_RETRY_ROUNDS` | `1`     |
    /// | `SIM_TICK_MS`         | `200`   |
    /// | `SIM_STEP_PERCENT`    | `10`    |
    /// | `SIM_PROCESSING_MS`   | `1500`  |
    /// | `SIM_FAILURE_RATE`    | `0.0`   |
    ///
    /// At least one of `INGEST_DIR` and `INGEST_SOURCES` must be set.
    pub fn from_env() -> Result<Self, WorkerError> {
        let defaults = SimulationSettings::default();

        let settings = Self {
            ingest_dir: env_opt("INGEST_DIR").map(PathBuf::from),
            sources_file: env_opt("INGEST_SOURCES").map(PathBuf::from),
            library: env_parse("INGEST_LIBRARY")?.unwrap_or_default(),
            metadata_out: env_opt("INGEST_METADATA_OUT").map(PathBuf::from),
            simulation: SimulationSettings {
                tick_ms: env_parse("SIM_TICK_MS")?.unwrap_or(defaults.tick_ms),
                step_percent: env_parse("SIM_STEP_PERCENT")?.unwrap_or(defaults.step_percent),
                processing_ms: env_parse("SIM_PROCESSING_MS")?.unwrap_or(defaults.processing_ms),
                failure_rate: env_parse("SIM_FAILURE_RATE")?.unwrap_or(defaults.failure_rate),
            },
            retry_rounds: env_parse("INGEST_RETRY_ROUNDS")?.unwrap_or(DEFAULT_RETRY_ROUNDS),
        };

        settings.validated()
    }

    pub fn validated(self) -> Result<Self, WorkerError> {
        if self.ingest_dir.is_none() && self.sources_file.is_none() {
            return Err(WorkerError::Config(
                "Set INGEST_DIR or INGEST_SOURCES (or both)".into(),
            ));
        }
        self.simulation
            .validate()
            .map_err(|e| WorkerError::Config(e.to_string()))?;
        Ok(self)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, WorkerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.parse()
                .map_err(|e| WorkerError::Config(format!("{key}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            ingest_dir: Some(PathBuf::from("/srv/ingest")),
            sources_file: None,
            library: Library::Footage,
            metadata_out: None,
            simulation: SimulationSettings::default(),
            retry_rounds: 1,
        }
    }

    #[test]
    fn library_parses_aliases() {
        assert_eq!("Video".parse::<Library>().unwrap(), Library::Footage);
        assert_eq!("overlay".parse::<Library>().unwrap(), Library::Overlays);
        assert_matches!("podcasts".parse::<Library>(), Err(WorkerError::Config(_)));
    }

    #[test]
    fn any_library_has_no_allow_list() {
        assert!(Library::Any.allow_list().is_none());
        let overlays = Library::Overlays.allow_list().unwrap();
        assert!(overlays.extensions().iter().any(|e| e == "png"));
    }

    #[test]
    fn requires_a_source() {
        let mut s = settings();
        s.ingest_dir = None;
        assert_matches!(s.validated(), Err(WorkerError::Config(msg)) if msg.contains("INGEST_DIR"));
    }

    #[test]
    fn failure_rate_must_be_a_probability() {
        let mut s = settings();
        s.simulation.failure_rate = 1.5;
        assert_matches!(s.validated(), Err(WorkerError::Config(_)));
    }

    #[test]
    fn zero_step_is_rejected() {
        let mut s = settings();
        s.simulation.step_percent = 0;
        assert!(s.validated().is_err());
    }
}
