//! Job identity, lifecycle status, and progress event types.
//!
//! A job is addressed by `(JobType, JobId)`. Its persisted status moves
//! strictly forward through [`JobStatus`]; progress is reported per image
//! through [`ProgressEvent`]s produced by the progress decoder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::ImageIndex;

// ---------------------------------------------------------------------------
// Job type
// ---------------------------------------------------------------------------

/// The kind of generation a job performs.
///
/// The slug doubles as the HTTP route segment, the output subdirectory, and
/// the first half of the store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    TextToImage,
    ImageToImage,
    InpaintImage,
}

impl JobType {
    /// All job types, in route declaration order.
    pub const ALL: [JobType; 3] = [
        JobType::TextToImage,
        JobType::ImageToImage,
        JobType::InpaintImage,
    ];

    /// URL/path slug, e.g. `"text-to-image"`.
    pub fn slug(self) -> &'static str {
        match self {
            JobType::TextToImage => "text-to-image",
            JobType::ImageToImage => "image-to-image",
            JobType::InpaintImage => "inpaint-image",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.slug() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job type '{s}'")))
    }
}

/// Store key for a job: `"{job_type}/{id}"`.
///
/// Also used verbatim as the record's `resultEndpoint`.
pub fn job_key(job_type: JobType, id: &str) -> String {
    format!("{}/{id}", job_type.slug())
}

/// Relative URL of one output image: `"{job_type}/{id}/{index}.png"`.
pub fn image_url(job_type: JobType, id: &str, index: ImageIndex) -> String {
    format!("{}/{id}/{index}.png", job_type.slug())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Persisted lifecycle state of a job.
///
/// Transitions only move forward: `Queued -> InProgress -> Complete`.
/// `InProgress -> InProgress` is allowed (progress updates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Complete,
}

impl JobStatus {
    /// The string stored in the database and returned over HTTP.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Complete => "COMPLETE",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == JobStatus::Complete
    }

    /// Whether a record in this status may move to `next`.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Complete)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETE" => Ok(JobStatus::Complete),
            other => Err(CoreError::Validation(format!("Unknown job status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// One decoded progress update for a running job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// 1-based index of the image currently being generated.
    pub current_image_index: ImageIndex,
    /// Progress of that image in `0.0..=1.0`.
    pub current_image_progress: f64,
    /// Total number of images the job will produce.
    pub total_images: ImageIndex,
}

impl ProgressEvent {
    pub fn new(index: ImageIndex, progress: f64, total: ImageIndex) -> Self {
        Self {
            current_image_index: index,
            current_image_progress: progress,
            total_images: total,
        }
    }

    /// Whether this event marks its image as fully generated.
    pub fn is_image_finished(&self) -> bool {
        self.current_image_progress >= 1.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_slug_round_trips_through_from_str() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.slug().parse::<JobType>().unwrap(), job_type);
        }
        assert!("upscale".parse::<JobType>().is_err());
    }

    #[test]
    fn key_and_image_url_format() {
        assert_eq!(job_key(JobType::InpaintImage, "abc"), "inpaint-image/abc");
        assert_eq!(
            image_url(JobType::TextToImage, "abc", 3),
            "text-to-image/abc/3.png"
        );
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!("COMPLETE".parse::<JobStatus>().unwrap(), JobStatus::Complete);
    }

    #[test]
    fn status_transitions_only_move_forward() {
        use JobStatus::*;
        assert!(Queued.can_advance_to(InProgress));
        assert!(InProgress.can_advance_to(InProgress));
        assert!(InProgress.can_advance_to(Complete));

        assert!(!Queued.can_advance_to(Complete));
        assert!(!Complete.can_advance_to(InProgress));
        assert!(!Complete.can_advance_to(Complete));
        assert!(!InProgress.can_advance_to(Queued));
    }

    #[test]
    fn progress_event_uses_camel_case_fields() {
        let event = ProgressEvent::new(2, 0.5, 3);
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["currentImageIndex"], 2);
        assert_eq!(json["currentImageProgress"], 0.5);
        assert_eq!(json["totalImages"], 3);
        assert!(!event.is_image_finished());
        assert!(ProgressEvent::new(2, 1.0, 3).is_image_finished());
    }
}
