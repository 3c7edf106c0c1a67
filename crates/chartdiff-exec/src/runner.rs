//! External process execution with a hard timeout.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::error::{ExecError, Result};

/// How long to keep draining pipes after the process is gone. Only matters
/// when something outside the process group still holds a pipe open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit code 0.
    Success,

    /// Non-zero exit code, or `None` when killed by a signal.
    Failed { code: Option<i32> },

    /// Killed after exceeding the runner's timeout.
    TimedOut { elapsed: Duration },
}

/// Captured output of one process run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,

    /// Captured stderr (lossy UTF-8). Partial when the run timed out.
    pub stderr: String,

    pub outcome: ExitOutcome,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Whether the process exited with code 0.
    pub fn succeeded(&self) -> bool {
        self.outcome == ExitOutcome::Success
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, ExitOutcome::TimedOut { .. })
    }
}

/// Runs external commands, enforcing one deployment-wide timeout.
///
/// Every child is started in its own process group. When the run ends, the
/// whole group is killed, so neither a timed-out tool nor anything it forked
/// outlives the call.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl ProcessRunner {
    /// 600 000 ms.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600_000);

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `spec` to completion or until the timeout fires.
    ///
    /// Only failing to start or wait for the process is an `Err`; non-zero
    /// exits and timeouts are reported through [`ExitOutcome`].
    pub async fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        if spec.program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        debug!(command = %spec.display(), "spawning process");
        let mut child = command.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        // The child leads its own group, so the pgid is its pid. Taken
        // while the child is unreaped; once `wait` returns the id may be reused.
        let group = child.id();

        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        let outcome = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|source| ExecError::Wait {
                    program: spec.program.clone(),
                    source,
                })?;
                if status.success() {
                    ExitOutcome::Success
                } else {
                    ExitOutcome::Failed {
                        code: status.code(),
                    }
                }
            }
            Err(_) => {
                let elapsed = start.elapsed();
                warn!(
                    command = %spec.display(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "process timed out, killing process group"
                );
                terminate(&mut child, group).await;
                ExitOutcome::TimedOut { elapsed }
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        Ok(ProcessOutput {
            stdout,
            stderr,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

type Captured = (Arc<Mutex<Vec<u8>>>, JoinHandle<()>);

/// Stream a pipe into a shared buffer so partial output survives a kill.
fn capture<R>(mut pipe: R) -> Captured
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = tokio::spawn(async move {
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    (buffer, handle)
}

async fn collect(captured: Option<Captured>) -> String {
    let Some((buffer, mut handle)) = captured else {
        return String::new();
    };
    if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
        handle.abort();
    }
    let bytes = buffer.lock().map(|buf| buf.clone()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kill the group before reaping the leader, so the pgid cannot have been
/// recycled yet.
async fn terminate(child: &mut Child, group: Option<u32>) {
    if let Some(group) = group {
        kill_process_group(group);
    }
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill timed-out process");
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(pid as i32);
    // ESRCH just means the group is already gone.
    let _ = killpg(group, Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
