//! Queue event stream.
//!
//! - [`EventBus`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`QueueEvent`] -- the envelope published for every job change.

pub mod bus;

pub use bus::{EventBus, QueueEvent, QueueEventKind};
