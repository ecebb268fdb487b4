//! Child process execution with streamed output.
//!
//! The child's stdout and stderr are pumped into one bounded channel, so the
//! peer sees them interleaved roughly as produced. The response status goes
//! out before the child exits and never reflects its exit code.
//!
//! Every child leads its own process group. When the execution time limit
//! fires the whole group is killed, so commands a shell forked do not keep
//! the output pipes (and the response) open.

use std::path::PathBuf;
use std::process::Stdio;

use std::time::Duration;

use bytes::Bytes;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{pump, ByteStream, ExecOptions, ExecutorError, CHANNEL_DEPTH};

/// Default shell interpreter for shell requests.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// How long output may keep draining after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program path.
    pub program: PathBuf,
    /// Argument vector, passed verbatim.
    pub args: Vec<String>,
}

impl ProcessSpec {
    /// A shell interpreter reading its script from stdin.
    pub fn shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            program: shell.into(),
            args: Vec::new(),
        }
    }

    /// A program with arguments.
    pub fn command(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Spawn `spec`, feed it `input` on stdin, and stream its combined output.
///
/// Stdin is closed once `input` is written. The returned stream ends after
/// both output pipes hit EOF and the child has been reaped. When the stream
/// is dropped early the pumps stop reading; the child is not killed and runs
/// until it exits or writes to the closed pipe.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned.
pub fn spawn_streaming(
    spec: &ProcessSpec,
    input: Bytes,
    opts: &ExecOptions,
) -> Result<ByteStream, ExecutorError> {
    let target = spec.program.display().to_string();
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| ExecutorError::from_io(target.clone(), e))?;

    let pid = child.id();
    debug!(program = %target, ?pid, args = ?spec.args, "child spawned");

    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    if let Some(mut stdin) = child.stdin.take() {
        let program = target.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(program = %program, error = %e, "child closed stdin early");
            }
            // Dropping the handle closes the pipe.
        });
    }

    let stdout = child.stdout.take().map(|out| tokio::spawn(pump(out, tx.clone())));
    let stderr = child.stderr.take().map(|err| tokio::spawn(pump(err, tx.clone())));

    let timeout = opts.timeout;
    tokio::spawn(async move {
        let timed_out = wait_for_exit(&mut child, &target, timeout).await;
        let mut delivered: u64 = 0;
        for mut handle in [stdout, stderr].into_iter().flatten() {
            let drained = if timed_out {
                // A descendant that left the group may still hold the pipes.
                match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
                    Ok(result) => result,
                    Err(_) => {
                        handle.abort();
                        handle.await
                    }
                }
            } else {
                handle.await
            };
            if let Ok(n) = drained {
                delivered = delivered.saturating_add(n);
            }
        }
        debug!(program = %target, bytes = delivered, "child output drained");
        // The body ends when the last sender goes away, after the child exited.
        drop(tx);
    });

    Ok(ReceiverStream::new(rx))
}

/// Reap `child`, killing its process group once `timeout` elapses.
///
/// Returns whether the time limit fired.
async fn wait_for_exit(child: &mut Child, program: &str, timeout: Option<Duration>) -> bool {
    let (status, timed_out) = match timeout {
        None => (child.wait().await, false),
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => (status, false),
            Err(_) => {
                warn!(
                    program,
                    seconds = limit.as_secs(),
                    "child exceeded execution time limit, killing its process group"
                );
                kill_group(child, program).await;
                (child.wait().await, true)
            }
        },
    };

    match status {
        Ok(status) => info!(program, exit = ?status.code(), "child exited"),
        Err(e) => warn!(program, error = %e, "failed to wait for child"),
    }
    timed_out
}

/// SIGKILL the group led by `child`, falling back to the child alone.
async fn kill_group(child: &mut Child, program: &str) {
    let group = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);
    if let Some(pgid) = group {
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => return,
            Err(e) => warn!(program, error = %e, "failed to signal process group"),
        }
    }
    if let Err(e) = child.kill().await {
        warn!(program, error = %e, "failed to kill child");
    }
}
