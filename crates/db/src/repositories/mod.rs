//! Query layer. Each repository is a unit struct of `async fn`s taking the
//! pool.

pub mod job_record_repo;

pub use job_record_repo::JobRecordRepo;
