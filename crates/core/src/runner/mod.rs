//! External generation process runner.
//!
//! [`run`] spawns the generation script, pipes its stderr through a
//! [`ProgressDecoder`](crate::progress::ProgressDecoder), and reports what
//! happens as a stream of [`RunnerEvent`]s on a channel: any number of
//! `Progress` events followed by exactly one terminal `Done` or `Error`.
//!
//! Output images are a side channel: the script writes `1.png`, `2.png`, …
//! into the command's output directory, and a `1.0` progress event is only
//! forwarded once its image file exists.

pub mod args;
pub mod output;
pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::job::ProgressEvent;
use crate::progress::DecodeError;

pub use args::{build_args, snake_case, FlagMap, FlagValue};
pub use process::run;

/// Interval between checks for an output image before emitting its final
/// progress event.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Everything needed to launch one generation process.
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    /// Executable to spawn (e.g. `python`).
    pub program: String,
    /// Arguments placed before the flags (e.g. the script path).
    pub leading_args: Vec<String>,
    /// Flags rendered by [`build_args`].
    pub flags: FlagMap,
    /// Additional environment variables for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Directory the process writes `<index>.png` files into.
    pub output_directory: PathBuf,
    /// How often to look for an output image before reporting it finished.
    pub poll_interval: Duration,
}

impl RunnerCommand {
    pub fn new(program: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            flags: FlagMap::new(),
            env_vars: Vec::new(),
            working_directory: None,
            output_directory: output_directory.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Path of the image with the given 1-based index.
    pub fn output_image_path(&self, index: u32) -> PathBuf {
        self.output_directory.join(format!("{index}.png"))
    }
}

/// Something observed while a generation process runs.
#[derive(Debug)]
pub enum RunnerEvent {
    Progress(ProgressEvent),
    /// Terminal: the process exited with code 0.
    Done,
    /// Terminal: the process could not run, failed, or logged nonsense.
    Error(RunnerError),
}

impl RunnerEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunnerEvent::Progress(_))
    }
}

/// Receiving half of a runner's event stream.
pub type RunnerEvents = mpsc::Receiver<RunnerEvent>;

/// Errors that end a generation process run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decoder rejected the output; the process is killed.
    #[error(transparent)]
    Sequence(#[from] DecodeError),

    /// Non-zero exit. `stderr` holds the tail of the captured error stream.
    #[error("Process exited with code {exit_code}\n{stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },
}
