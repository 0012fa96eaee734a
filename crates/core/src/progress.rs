//! Streaming decoder for the generation script's stderr.
//!
//! The script does not speak a protocol; it logs tqdm progress bars. Two
//! kinds of line carry information:
//!
//! - iteration lines, `Sampling:  33%|███▎      | 1/3 [00:10<00:20, ...]`,
//!   where `1/3` means one image of three is done and the second has begun;
//! - percentage lines, `PLMS Sampler:  50%|█████     | 4/8 [...]` or
//!   `Decoding image: 100%|...`, reporting progress within the current image.
//!
//! The script repeats lines and may interleave output for successive images.
//! [`ProgressDecoder`] turns that noise into a gap-free sequence of
//! [`ProgressEvent`]s: duplicates are dropped, events for images ahead of
//! the expected one are held in a backlog until that image's turn, and
//! events for images already finished are discarded.
//!
//! One decoder serves exactly one process invocation. Events with
//! `progress == 1.0` are emitted as soon as they are decoded; the process
//! runner holds them back until the image file is on disk.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::job::ProgressEvent;
use crate::types::ImageIndex;

static ITERATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sampling:[^|]*\|[^|]*\|\s*(\d+)/(\d+)").expect("valid iteration regex")
});

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Sampler|Decoding image):\s+(\d+)%").expect("valid percentage regex")
});

/// Errors raised while decoding a process's output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A percentage line arrived before any iteration line, so there is no
    /// image to attribute it to.
    #[error("Progress before iteration: {line}")]
    ProgressBeforeIteration { line: String },
}

/// Information extracted from a single log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLine {
    /// `completed` of `total` images are done.
    Iteration { completed: u32, total: u32 },
    /// Progress within the current image, in whole percent.
    Percentage(u32),
}

/// Classify one line of output. Returns `None` for lines carrying no
/// progress information.
pub fn parse_line(line: &str) -> Option<LogLine> {
    if let Some(caps) = ITERATION_RE.captures(line) {
        let completed = caps[1].parse().ok()?;
        let total = caps[2].parse().ok()?;
        return Some(LogLine::Iteration { completed, total });
    }
    if let Some(caps) = PERCENT_RE.captures(line) {
        return caps[1].parse().ok().map(LogLine::Percentage);
    }
    None
}

/// Stateful stderr decoder for one generation process.
#[derive(Debug)]
pub struct ProgressDecoder {
    /// The image whose events are currently passed through.
    expected_index: ImageIndex,
    /// Fixed by the first iteration line.
    total_images: Option<ImageIndex>,
    /// Index from the most recent iteration line.
    current_index: Option<ImageIndex>,
    /// `(index, progress bits)` pairs already accepted.
    seen: HashSet<(ImageIndex, u64)>,
    /// Events for images after `expected_index`, waiting their turn.
    backlog: Vec<ProgressEvent>,
    /// Bytes of a line not yet terminated by `\n` or `\r`.
    partial: Vec<u8>,
}

impl Default for ProgressDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self {
            expected_index: 1,
            total_images: None,
            current_index: None,
            seen: HashSet::new(),
            backlog: Vec::new(),
            partial: Vec::new(),
        }
    }

    pub fn expected_index(&self) -> ImageIndex {
        self.expected_index
    }

    pub fn total_images(&self) -> Option<ImageIndex> {
        self.total_images
    }

    /// Number of events currently held back.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Feed a raw chunk of output. tqdm redraws bars with `\r`, so both
    /// `\r` and `\n` terminate a line.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ProgressEvent>, DecodeError> {
        let mut events = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                events.extend(self.push_line(&line)?);
            } else {
                self.partial.push(byte);
            }
        }
        Ok(events)
    }

    /// Decode whatever unterminated line remains once the stream has ended.
    pub fn finish(&mut self) -> Result<Vec<ProgressEvent>, DecodeError> {
        if self.partial.is_empty() {
            return Ok(Vec::new());
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        self.push_line(&line)
    }

    /// Feed one complete line.
    pub fn push_line(&mut self, line: &str) -> Result<Vec<ProgressEvent>, DecodeError> {
        let candidate = match parse_line(line) {
            Some(LogLine::Iteration { completed, total }) => {
                // The closing `n/n` bar carries nothing new.
                if completed >= total {
                    return Ok(Vec::new());
                }
                let total = *self.total_images.get_or_insert(total);
                let index = completed + 1;
                self.current_index = Some(index);
                ProgressEvent::new(index, 0.0, total)
            }
            Some(LogLine::Percentage(percent)) => {
                let (Some(index), Some(total)) = (self.current_index, self.total_images) else {
                    return Err(DecodeError::ProgressBeforeIteration {
                        line: line.trim().to_string(),
                    });
                };
                let progress = (f64::from(percent) / 100.0).min(1.0);
                ProgressEvent::new(index, progress, total)
            }
            None => return Ok(Vec::new()),
        };
        Ok(self.accept(candidate))
    }

    fn accept(&mut self, candidate: ProgressEvent) -> Vec<ProgressEvent> {
        let key = (
            candidate.current_image_index,
            candidate.current_image_progress.to_bits(),
        );
        if !self.seen.insert(key) {
            return Vec::new();
        }

        let index = candidate.current_image_index;
        if index > self.expected_index {
            self.backlog.push(candidate);
            return Vec::new();
        }
        if index < self.expected_index {
            return Vec::new();
        }

        let mut emitted = vec![candidate];
        if candidate.is_image_finished() {
            self.advance(&mut emitted);
        }
        emitted
    }

    /// Move past a finished image, releasing backlog entries for the next
    /// one. Repeats while the released entries themselves finish an image.
    fn advance(&mut self, emitted: &mut Vec<ProgressEvent>) {
        loop {
            self.expected_index += 1;
            let next = self.expected_index;

            let (mut ready, rest): (Vec<_>, Vec<_>) = self
                .backlog
                .drain(..)
                .partition(|e| e.current_image_index == next);
            self.backlog = rest;

            ready.sort_by(|a, b| a.current_image_progress.total_cmp(&b.current_image_progress));
            let finished = ready.iter().any(ProgressEvent::is_image_finished);
            emitted.extend(ready);

            if !finished {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
