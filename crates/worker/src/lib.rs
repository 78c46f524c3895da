//! `reelflow-worker` library crate.
//!
//! Batch ingestion driver for the upload queue. Re-exports its modules for
//! integration testing; the binary entrypoint lives in `main.rs`.

pub mod error;
pub mod ingest;
pub mod metadata;
pub mod scan;
pub mod settings;
pub mod simulated;

pub use error::WorkerError;
pub use ingest::{run, IngestSummary};
pub use settings::{Library, SimulationSettings, WorkerSettings};
