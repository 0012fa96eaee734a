//! Fixed-width worker pool over a single FIFO channel.
//!
//! `width` worker tasks share one receiver behind a mutex. Whichever idle
//! worker holds the lock takes the next task, so tasks start in submission
//! order and each runs exactly once. At most `width` tasks run at a time;
//! [`WorkerPool::submit`] never waits.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SchedulerError;

/// A unit of work. Not polled until a worker picks it up.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Task>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    width: usize,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `width` workers (at least one). Must be called inside a Tokio
    /// runtime.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let queued = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        for worker in 0..width {
            tracker.spawn(worker_loop(
                worker,
                Arc::clone(&receiver),
                cancel.clone(),
                Arc::clone(&queued),
                Arc::clone(&running),
            ));
        }
        tracker.close();
        tracing::info!(width, "Worker pool started");

        Self {
            sender,
            tracker,
            cancel,
            width,
            queued,
            running,
        }
    }

    /// Append a task to the queue.
    pub fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Closed);
        }
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(task).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            SchedulerError::Closed
        })
    }

    /// Whether [`WorkerPool::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop all workers. Queued tasks are dropped without running and
    /// running tasks are dropped at their next suspension point.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.wait().await;
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    cancel: CancellationToken,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = next else {
            break;
        };

        queued.fetch_sub(1, Ordering::SeqCst);
        running.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(worker, "Running task abandoned at shutdown");
            }
            _ = task => {}
        }
        running.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!(worker, "Worker exiting");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
