//! Durable job status store on SQLite.
//!
//! The database lives in a single file inside the store directory
//! (`<output_dir>/.database/jobs.db`). Records are addressed by
//! `"{job_type}/{job_id}"`; see [`repositories::JobRecordRepo`].

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

pub mod error;
pub mod models;
pub mod repositories;

pub use error::StoreError;

pub type DbPool = sqlx::SqlitePool;

/// File name of the database inside the store directory.
pub const DATABASE_FILE: &str = "jobs.db";

/// Open (creating if needed) the store inside `dir`.
pub async fn create_pool(dir: &Path) -> Result<DbPool, StoreError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(DATABASE_FILE);

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    tracing::info!(path = %path.display(), "Job store opened");
    Ok(pool)
}

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Check the store answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
