//! Domain types and pure logic for the reelflow upload queue.
//!
//! Nothing in this crate performs I/O or spawns tasks. It holds the job
//! model, the state machine that governs it, item admission policies,
//! preview handles, queue statistics and configuration, so that the
//! scheduler and any tooling share one definition of each.

pub mod config;
pub mod error;
pub mod item;
pub mod job;
pub mod resource;
pub mod state_machine;
pub mod stats;
pub mod types;
pub mod validation;

pub use config::{CapacityPolicy, OrchestratorConfig};
pub use error::{AllocationError, CoreError, HookError, JobError, RejectReason, TransportError};
pub use item::{ContentRef, MediaKind, UploadItem};
pub use job::{Job, JobStatus, JobView};
pub use resource::{PreviewAllocator, ResourceAllocator, ResourceHandle};
pub use state_machine::{Outcome, TransitionError, Trigger};
pub use stats::{aggregate, QueueStats};
pub use types::JobId;
pub use validation::{AllowAll, AllowList, ItemPolicy};
