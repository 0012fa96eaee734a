//! Repository for the `job_records` table.
//!
//! Every mutation is a read-modify-write of one row inside a
//! `BEGIN IMMEDIATE` transaction, so concurrent writers to different keys
//! serialize on the database lock instead of failing with a stale snapshot.

use chrono::Utc;

use sdapi_core::job::{job_key, JobStatus, JobType, ProgressEvent};

use crate::error::StoreError;
use crate::models::job_record::{JobRecord, JobRecordRow};
use crate::DbPool;

/// Column list for `job_records` queries.
const COLUMNS: &str = "key, job_type, job_id, status, record, created_at, updated_at";

/// Persistence for job lifecycle records.
pub struct JobRecordRepo;

impl JobRecordRepo {
    /// Insert a `QUEUED` record with no images.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the key is taken.
    pub async fn create(pool: &DbPool, job_type: JobType, id: &str) -> Result<JobRecord, StoreError> {
        let key = job_key(job_type, id);
        let record = JobRecord::queued(job_type, id);
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT OR IGNORE INTO job_records (key, job_type, job_id, status, record, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key)
        .bind(job_type.slug())
        .bind(id)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record)?)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists { key });
        }
        Ok(record)
    }

    pub async fn get(pool: &DbPool, job_type: JobType, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM job_records WHERE key = ?");
        let row = sqlx::query_as::<_, JobRecordRow>(&query)
            .bind(job_key(job_type, id))
            .fetch_optional(pool)
            .await?;
        row.map(|r| r.decode()).transpose().map_err(StoreError::from)
    }

    /// Apply a progress event and move the record to `IN_PROGRESS`.
    ///
    /// The first call sizes the image list from `event.total_images`; the
    /// length never changes afterwards. Image progress only ever increases.
    pub async fn advance_to_in_progress(
        pool: &DbPool,
        job_type: JobType,
        id: &str,
        event: &ProgressEvent,
    ) -> Result<JobRecord, StoreError> {
        Self::update(pool, job_type, id, |key, record| {
            if !record.status.can_advance_to(JobStatus::InProgress) {
                return Err(StoreError::InvalidTransition {
                    key: key.to_string(),
                    from: record.status,
                    to: JobStatus::InProgress,
                });
            }

            record.ensure_images(job_type, id, event.total_images);
            let total = record.images.len();
            let slot = (event.current_image_index as usize)
                .checked_sub(1)
                .and_then(|i| record.images.get_mut(i))
                .ok_or_else(|| StoreError::InvalidProgress {
                    key: key.to_string(),
                    index: event.current_image_index,
                    total,
                })?;

            slot.progress = slot.progress.max(event.current_image_progress.clamp(0.0, 1.0));
            record.status = JobStatus::InProgress;
            Ok(())
        })
        .await
    }

    /// Move an `IN_PROGRESS` record to `COMPLETE`.
    pub async fn advance_to_complete(pool: &DbPool, job_type: JobType, id: &str) -> Result<JobRecord, StoreError> {
        Self::update(pool, job_type, id, |key, record| {
            if !record.status.can_advance_to(JobStatus::Complete) {
                return Err(StoreError::InvalidTransition {
                    key: key.to_string(),
                    from: record.status,
                    to: JobStatus::Complete,
                });
            }
            record.status = JobStatus::Complete;
            Ok(())
        })
        .await
    }

    /// Delete every record that is not `COMPLETE`. Returns the number removed.
    pub async fn delete_all_incomplete(pool: &DbPool) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM job_records WHERE status != ?")
            .bind(JobStatus::Complete.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of records in each status, for startup logging.
    pub async fn count_by_status(pool: &DbPool) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM job_records GROUP BY status ORDER BY status",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Read-modify-write one record under an immediate write lock.
    ///
    /// The transaction rolls back if `apply` fails or the future is dropped
    /// before the commit.
    async fn update<F>(pool: &DbPool, job_type: JobType, id: &str, apply: F) -> Result<JobRecord, StoreError>
    where
        F: FnOnce(&str, &mut JobRecord) -> Result<(), StoreError>,
    {
        let key = job_key(job_type, id);
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let raw: Option<(String,)> = sqlx::query_as("SELECT record FROM job_records WHERE key = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((raw,)) = raw else {
            return Err(StoreError::NotFound { key });
        };

        let mut record: JobRecord = serde_json::from_str(&raw)?;
        apply(&key, &mut record)?;

        sqlx::query("UPDATE job_records SET status = ?, record = ?, updated_at = ? WHERE key = ?")
            .bind(record.status.as_str())
            .bind(serde_json::to_string(&record)?)
            .bind(Utc::now())
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }
}
