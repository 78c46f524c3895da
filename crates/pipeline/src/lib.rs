//! Bounded-concurrency upload pipeline.
//!
//! - [`Orchestrator`] -- the queue facade: add, start, cancel, retry, remove,
//!   clear, snapshot.
//! - [`TransportPort`] -- injected collaborator that performs one upload.
//! - [`CompletionHook`] -- downstream step run once per completed upload.
//!
//! Jobs move through `queued → uploading → processing → completed/failed`
//! under [`reelflow_core::state_machine`]; at most `concurrency_limit` of
//! them execute at once.

pub mod hooks;
pub mod orchestrator;
mod scheduler;
pub mod snapshot;
pub mod transport;

pub use hooks::{CompletedUpload, CompletionHook, HookFailure};
pub use orchestrator::{AddReport, CancelOutcome, Orchestrator, OrchestratorBuilder, RejectedItem};
pub use snapshot::QueueSnapshot;
pub use transport::{ProgressReporter, ProgressSignal, TransferReceipt, TransferRequest, TransportPort};
