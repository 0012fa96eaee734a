use sdapi_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker pool has been shut down and accepts no more work.
    #[error("Scheduler is shut down")]
    Closed,
}
