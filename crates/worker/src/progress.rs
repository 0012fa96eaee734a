//! Runner event handling for one job.
//!
//! Consumes a runner's event stream in order and applies each event to the
//! job's record. Store failures here are logic errors (the record was
//! deleted or advanced behind the job's back); they are logged at error
//! level and the stream keeps being consumed.

use sdapi_core::job::JobType;
use sdapi_core::runner::{RunnerEvent, RunnerEvents};
use sdapi_db::repositories::JobRecordRepo;
use sdapi_db::DbPool;
use sdapi_events::{EventBus, JobEvent, JobEventKind};

/// How a job's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The process failed or its output could not be decoded. The record is
    /// left in whatever state it reached.
    Failed(String),
}

/// Drive one job's record from its runner events until a terminal event.
pub async fn drive_job(
    pool: &DbPool,
    bus: &EventBus,
    job_type: JobType,
    job_id: &str,
    mut events: RunnerEvents,
) -> JobOutcome {
    while let Some(event) = events.recv().await {
        match event {
            RunnerEvent::Progress(progress) => {
                match JobRecordRepo::advance_to_in_progress(pool, job_type, job_id, &progress).await {
                    Ok(record) => {
                        tracing::debug!(
                            %job_type,
                            job_id,
                            image = progress.current_image_index,
                            total = progress.total_images,
                            percent = (progress.current_image_progress * 100.0).round() as u32,
                            overall = (record.overall_progress() * 100.0).round() as u32,
                            "Progress",
                        );
                        bus.publish(JobEvent::new(job_type, job_id, JobEventKind::Progress(progress)));
                    }
                    Err(e) => {
                        tracing::error!(%job_type, job_id, error = %e, "Failed to record progress");
                    }
                }
            }

            RunnerEvent::Done => {
                return match JobRecordRepo::advance_to_complete(pool, job_type, job_id).await {
                    Ok(_) => {
                        tracing::info!(%job_type, job_id, "Done");
                        bus.publish(JobEvent::new(job_type, job_id, JobEventKind::Completed));
                        JobOutcome::Completed
                    }
                    Err(e) => {
                        tracing::error!(%job_type, job_id, error = %e, "Failed to mark job complete");
                        fail(bus, job_type, job_id, e.to_string())
                    }
                };
            }

            RunnerEvent::Error(e) => {
                tracing::error!(%job_type, job_id, error = %e, "Generation failed");
                return fail(bus, job_type, job_id, e.to_string());
            }
        }
    }

    tracing::error!(%job_type, job_id, "Runner stream ended without a terminal event");
    fail(bus, job_type, job_id, "runner stream ended unexpectedly".to_string())
}

fn fail(bus: &EventBus, job_type: JobType, job_id: &str, error: String) -> JobOutcome {
    bus.publish(JobEvent::new(
        job_type,
        job_id,
        JobEventKind::Failed { error: error.clone() },
    ));
    JobOutcome::Failed(error)
}
