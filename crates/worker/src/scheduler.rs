//! Job admission and dispatch.

use std::sync::Arc;

use sdapi_core::job::JobType;
use sdapi_core::runner::RunnerEvents;
use sdapi_core::types::JobId;
use sdapi_db::models::job_record::JobRecord;
use sdapi_db::repositories::JobRecordRepo;
use sdapi_db::{DbPool, StoreError};
use sdapi_events::{EventBus, JobEvent, JobEventKind};

use crate::error::SchedulerError;
use crate::pool::WorkerPool;
use crate::progress::{drive_job, JobOutcome};

/// Result of [`JobScheduler::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new record was created and the job queued.
    Accepted,
    /// A record for this job already exists; nothing was started.
    AlreadyTracked,
}

/// Accepts jobs, deduplicates them against the store, and runs them on a
/// bounded worker pool.
pub struct JobScheduler {
    db: DbPool,
    bus: Arc<EventBus>,
    workers: WorkerPool,
}

impl JobScheduler {
    /// Start a scheduler running at most `concurrency` jobs at once.
    pub fn new(db: DbPool, bus: Arc<EventBus>, concurrency: usize) -> Self {
        Self {
            db,
            bus,
            workers: WorkerPool::new(concurrency),
        }
    }

    /// Submit a job.
    ///
    /// If the store already has a record for `(job_type, id)` the job is not
    /// started again and `start` is never called. Otherwise a `QUEUED`
    /// record is written before this returns, and `start` runs once a
    /// worker is free.
    ///
    /// After [`JobScheduler::shutdown`] no record is written and the call
    /// fails with [`SchedulerError::Closed`]. A shutdown racing the enqueue
    /// itself leaves a `QUEUED` record for startup recovery.
    pub async fn submit<F>(&self, job_type: JobType, id: JobId, start: F) -> Result<SubmitOutcome, SchedulerError>
    where
        F: FnOnce() -> RunnerEvents + Send + 'static,
    {
        if self.workers.is_closed() {
            return Err(SchedulerError::Closed);
        }
        if JobRecordRepo::get(&self.db, job_type, &id).await?.is_some() {
            tracing::debug!(%job_type, job_id = %id, "Already tracked");
            return Ok(SubmitOutcome::AlreadyTracked);
        }

        match JobRecordRepo::create(&self.db, job_type, &id).await {
            Ok(_) => {}
            // Lost a race with an identical submission.
            Err(StoreError::AlreadyExists { .. }) => return Ok(SubmitOutcome::AlreadyTracked),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            %job_type,
            job_id = %id,
            ahead = self.workers.queued(),
            "Queued",
        );
        self.bus.publish(JobEvent::new(job_type, id.clone(), JobEventKind::Queued));

        let db = self.db.clone();
        let bus = Arc::clone(&self.bus);
        self.workers.submit(Box::pin(async move {
            tracing::info!(%job_type, job_id = %id, "Starting");
            bus.publish(JobEvent::new(job_type, id.clone(), JobEventKind::Started));

            let events = start();
            if let JobOutcome::Failed(error) = drive_job(&db, &bus, job_type, &id, events).await {
                tracing::warn!(%job_type, job_id = %id, %error, "Job left incomplete");
            }
        }))?;

        Ok(SubmitOutcome::Accepted)
    }

    /// Current record of a job, if any.
    pub async fn status(&self, job_type: JobType, id: &str) -> Result<Option<JobRecord>, SchedulerError> {
        Ok(JobRecordRepo::get(&self.db, job_type, id).await?)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn concurrency(&self) -> usize {
        self.workers.width()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.workers.queued()
    }

    /// Jobs currently running.
    pub fn running(&self) -> usize {
        self.workers.running()
    }

    /// Stop accepting work and stop the workers. Jobs still queued or
    /// running keep their records and are cleared by startup recovery.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }
}
