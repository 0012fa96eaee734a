//! In-process job lifecycle events.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`JobEvent`]: what happened to which job, and when.

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind};
