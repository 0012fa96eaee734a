//! Spawning the generation process and streaming its stderr.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::args::build_args;
use super::output::wait_for_file;
use super::{RunnerCommand, RunnerError, RunnerEvent, RunnerEvents};
use crate::job::ProgressEvent;
use crate::progress::ProgressDecoder;

/// Stderr bytes kept for the failure message (16 KiB).
const MAX_STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Buffered events between the runner task and its consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Start `command` in a background task and return its event stream.
///
/// Must be called from within a Tokio runtime. The stream yields progress
/// events in decoder order, then exactly one terminal event, then closes.
pub fn run(command: RunnerCommand) -> RunnerEvents {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let terminal = match drive(&command, &tx).await {
            Ok(()) => RunnerEvent::Done,
            Err(e) => RunnerEvent::Error(e),
        };
        // The consumer may have gone away; nothing left to tell it.
        let _ = tx.send(terminal).await;
    });

    rx
}

/// Run the process to completion, forwarding decoded progress.
async fn drive(command: &RunnerCommand, tx: &mpsc::Sender<RunnerEvent>) -> Result<(), RunnerError> {
    tokio::fs::create_dir_all(&command.output_directory).await?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.leading_args)
        .args(build_args(&command.flags))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        // Returning early (decode failure) drops the child and kills it.
        .kill_on_drop(true);

    for (key, value) in &command.env_vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &command.working_directory {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: command.program.clone(),
        source,
    })?;
    tracing::debug!(program = %command.program, pid = child.id(), "Generation process spawned");

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

    // Decoding and forwarding run side by side: a finished image waiting for
    // its file must not stop stderr from draining or the exit from being seen.
    // Unbounded so the decoder never blocks on a forwarder parked on a file.
    let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
    let decoding = async {
        let tail = pump_stderr(stderr, decoded_tx).await?;
        let status = child.wait().await?;
        Ok::<_, RunnerError>((tail, status))
    };
    let forwarding = forward(decoded_rx, command, tx);
    tokio::pin!(decoding, forwarding);

    let mut forwarded = false;
    let (tail, status) = loop {
        tokio::select! {
            outcome = &mut decoding => break outcome?,
            () = &mut forwarding, if !forwarded => forwarded = true,
        }
    };

    if !status.success() {
        // Held-back events for images that will never be written are dropped.
        return Err(RunnerError::ProcessFailed {
            exit_code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&tail).into_owned(),
        });
    }
    if !forwarded {
        forwarding.await;
    }
    Ok(())
}

/// Read stderr to EOF through the decoder, handing each decoded event to
/// `decoded`. Returns the captured tail.
async fn pump_stderr<R: AsyncRead + Unpin>(
    mut stderr: R,
    decoded: mpsc::UnboundedSender<ProgressEvent>,
) -> Result<Vec<u8>, RunnerError> {
    let mut decoder = ProgressDecoder::new();
    let mut tail = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = stderr.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];

        tail.extend_from_slice(chunk);
        if tail.len() > MAX_STDERR_TAIL_BYTES {
            let excess = tail.len() - MAX_STDERR_TAIL_BYTES;
            tail.drain(..excess);
        }

        for event in decoder.push_bytes(chunk)? {
            let _ = decoded.send(event);
        }
    }

    for event in decoder.finish()? {
        let _ = decoded.send(event);
    }
    Ok(tail)
}

/// Send decoded events in order, holding each finished image back until its
/// file exists. Ends once the decoder side closes.
async fn forward(
    mut decoded: mpsc::UnboundedReceiver<ProgressEvent>,
    command: &RunnerCommand,
    tx: &mpsc::Sender<RunnerEvent>,
) {
    while let Some(event) = decoded.recv().await {
        if event.is_image_finished() {
            let path = command.output_image_path(event.current_image_index);
            wait_for_file(&path, command.poll_interval).await;
        }
        if tx.send(RunnerEvent::Progress(event)).await.is_err() {
            tracing::debug!("Runner event receiver dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
