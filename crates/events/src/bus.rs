//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! The scheduler publishes a [`JobEvent`] at every lifecycle step. Nothing
//! depends on the events being observed; they exist for logging sinks and
//! for tests that need to wait on a job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use sdapi_core::job::{JobType, ProgressEvent};
use sdapi_core::types::JobId;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Record created and entry enqueued.
    Queued,
    /// A worker picked the job up and launched the process.
    Started,
    /// A decoded progress event was persisted.
    Progress(ProgressEvent),
    /// The record reached `COMPLETE`.
    Completed,
    /// The run ended without completing. The record is left as it was.
    Failed { error: String },
}

/// A lifecycle event for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_type: JobType,
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_type: JobType, job_id: impl Into<JobId>, kind: JobEventKind) -> Self {
        Self {
            job_type,
            job_id: job_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, JobEventKind::Completed | JobEventKind::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped silently if
    /// there are none.
    pub fn publish(&self, event: JobEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
