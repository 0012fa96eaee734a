//! Job execution: a bounded FIFO worker pool and the scheduler that feeds
//! it.
//!
//! [`JobScheduler::submit`] deduplicates by `(job_type, id)` against the
//! store, records the job as `QUEUED`, and enqueues it. A worker later
//! starts the process and [`progress::drive_job`] turns its events into
//! store transitions.

pub mod error;
pub mod pool;
pub mod progress;
pub mod scheduler;

pub use error::SchedulerError;
pub use pool::WorkerPool;
pub use scheduler::{JobScheduler, SubmitOutcome};
