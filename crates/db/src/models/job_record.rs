//! The job record as stored and as served over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use sdapi_core::job::{image_url, job_key, JobStatus, JobType};
use sdapi_core::types::ImageIndex;

/// Progress of one output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProgress {
    /// Relative URL, `"{job_type}/{id}/{index}.png"`.
    pub url: String,
    /// `0.0..=1.0`, never decreases.
    pub progress: f64,
}

/// Lifecycle state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub status: JobStatus,
    /// `"{job_type}/{id}"`. Fixed at creation.
    pub result_endpoint: String,
    /// Empty until the first progress event, then exactly `total_images`
    /// entries.
    pub images: Vec<ImageProgress>,
}

impl JobRecord {
    /// A freshly queued record with no images.
    pub fn queued(job_type: JobType, id: &str) -> Self {
        Self {
            status: JobStatus::Queued,
            result_endpoint: job_key(job_type, id),
            images: Vec::new(),
        }
    }

    /// Allocate the image list if it has not been allocated yet. Later calls
    /// never change its length.
    pub fn ensure_images(&mut self, job_type: JobType, id: &str, total: ImageIndex) {
        if self.images.is_empty() {
            self.images = (1..=total)
                .map(|index| ImageProgress {
                    url: image_url(job_type, id, index),
                    progress: 0.0,
                })
                .collect();
        }
    }

    /// Fraction of all images generated, `0.0` before allocation.
    pub fn overall_progress(&self) -> f64 {
        if self.images.is_empty() {
            return 0.0;
        }
        self.images.iter().map(|i| i.progress).sum::<f64>() / self.images.len() as f64
    }
}

/// A row from the `job_records` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRecordRow {
    pub key: String,
    pub job_type: String,
    pub job_id: String,
    pub status: String,
    pub record: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecordRow {
    pub fn decode(&self) -> Result<JobRecord, serde_json::Error> {
        serde_json::from_str(&self.record)
    }
}
