use sdapi_core::job::JobStatus;

/// Failures of the job status store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Job not found: {key}")]
    NotFound { key: String },

    #[error("Invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A progress event that does not fit the record's image list.
    #[error("Invalid progress for {key}: image {index} of {total}")]
    InvalidProgress { key: String, index: u32, total: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
