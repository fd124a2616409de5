//! Shell-command test executor.
//!
//! Each test is a shell command; its exit status is its verdict. Commands
//! run with a timeout so that one hung test cannot block a round forever.

use crate::stability::{Outcome, TestExecutor};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;

/// Bytes kept from each of stdout and stderr; the rest is read and dropped.
pub const MAX_CAPTURED_BYTES: usize = 64 * 1024;

/// A test defined by a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellTest {
    pub command: String,
    /// Overrides the executor's working directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl ShellTest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    SpawnFailed,
}

/// Result of running a shell command.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    /// Combined stdout and stderr output, each capped at [`MAX_CAPTURED_BYTES`].
    pub output: String,
    pub duration_ms: u64,
}

/// Run a shell command with a timeout.
///
/// The command is executed via `sh -c` to support shell features like pipes.
/// It runs in its own process group, and the whole group is killed once the
/// shell exits or the timeout expires, so nothing the test started outlives it.
pub async fn run_command_with_timeout(
    working_dir: &Path,
    command: &str,
    timeout: Duration,
) -> CommandResult {
    let start = Instant::now();

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return CommandResult {
                status: CommandStatus::SpawnFailed,
                output: format!("Failed to spawn command: {}", e),
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }
    };

    let pid = child.id();
    let stdout = tokio::spawn(read_capped(child.stdout.take(), MAX_CAPTURED_BYTES));
    let stderr = tokio::spawn(read_capped(child.stderr.take(), MAX_CAPTURED_BYTES));

    let result = tokio::time::timeout(timeout, child.wait()).await;
    kill_process_group(pid);
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(status)) => {
            let stdout = stdout.await.unwrap_or_default();
            let stderr = stderr.await.unwrap_or_default();
            let status = if status.success() {
                CommandStatus::Succeeded
            } else {
                CommandStatus::Failed {
                    code: status.code(),
                }
            };

            CommandResult {
                status,
                output: format!(
                    "{}{}",
                    String::from_utf8_lossy(&stdout),
                    String::from_utf8_lossy(&stderr)
                ),
                duration_ms,
            }
        }
        Ok(Err(e)) => {
            stdout.abort();
            stderr.abort();
            CommandResult {
                status: CommandStatus::SpawnFailed,
                output: format!("Command execution error: {}", e),
                duration_ms,
            }
        }
        Err(_) => {
            stdout.abort();
            stderr.abort();
            CommandResult {
                status: CommandStatus::TimedOut,
                output: format!("Command timed out after {:?}", timeout),
                duration_ms,
            }
        }
    }
}

/// Drain `pipe` to EOF, keeping at most `limit` bytes.
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, limit: usize) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => return kept,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // ESRCH: the group is already empty
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!("Failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Runs [`ShellTest`]s on a tokio runtime from synchronous code.
///
/// `execute` blocks on the runtime handle, so it must be called from outside
/// the runtime's async context (e.g. inside `spawn_blocking`). Called from an
/// async task it runs nothing: every test gets an error, an error is logged
/// once, and [`CommandExecutor::called_from_async_context`] reports it.
pub struct CommandExecutor {
    handle: Handle,
    working_dir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
    called_from_async: AtomicBool,
}

impl CommandExecutor {
    pub fn new(handle: Handle, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            handle,
            working_dir: working_dir.into(),
            timeout,
            max_output_bytes: 4000,
            called_from_async: AtomicBool::new(false),
        }
    }

    /// Whether `execute` was ever called where it could not block.
    pub fn called_from_async_context(&self) -> bool {
        self.called_from_async.load(Ordering::Relaxed)
    }

    fn block_on_command(&self, dir: &Path, command: &str) -> Option<CommandResult> {
        if self.called_from_async_context() {
            return None;
        }
        let run = run_command_with_timeout(dir, command, self.timeout);
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle.block_on(run))) {
            Ok(result) => Some(result),
            Err(_) => {
                self.called_from_async.store(true, Ordering::Relaxed);
                tracing::error!(
                    "Command executor was called from inside an async task; \
                     test commands are not being run (use spawn_blocking)"
                );
                None
            }
        }
    }
}

impl TestExecutor for CommandExecutor {
    type Unit = ShellTest;

    fn execute(&self, id: &str, test: &ShellTest, outcome: &mut Outcome) {
        let dir = test.working_dir.as_deref().unwrap_or(&self.working_dir);
        outcome.record_run();
        let Some(result) = self.block_on_command(dir, &test.command) else {
            outcome.record_error();
            return;
        };

        match result.status {
            CommandStatus::Succeeded => {}
            CommandStatus::Failed { code } => {
                tracing::debug!(
                    "Test {} failed (exit code {:?}) in {}ms:\n{}",
                    id,
                    code,
                    result.duration_ms,
                    truncate_output(&result.output, self.max_output_bytes)
                );
                outcome.record_failure();
            }
            CommandStatus::TimedOut | CommandStatus::SpawnFailed => {
                tracing::warn!("Test {} did not complete: {}", id, result.output);
                outcome.record_error();
            }
        }
    }
}

fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut end = max_bytes;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &output[..end])
}
