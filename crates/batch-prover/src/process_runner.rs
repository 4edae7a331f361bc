//! Process Runner (C1): launches a native subprocess, streams its output,
//! enforces a wall-clock timeout, and delivers graceful-then-forceful
//! termination.
//!
//! Every live child is registered under a monotonically increasing id so
//! that [`ProcessRunner::kill_all`] (used on forceful shutdown) can reach
//! processes it did not itself spawn the wait on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout as tokio_timeout;

/// Outcome of a single `run()` call.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

struct LiveChild {
    path: PathBuf,
    argv: Vec<String>,
    start_time: Instant,
    pid: Option<u32>,
}

/// Time given to a child between SIGTERM and SIGKILL.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Launches native subprocesses and tracks every live child for forceful
/// shutdown. Touched from the scheduler's loop and from the signal-handling
/// task, so the registry is guarded by a `Mutex`.
pub struct ProcessRunner {
    next_id: AtomicU64,
    registry: Mutex<HashMap<u64, LiveChild>>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Launch `executable argv...`, wait up to `timeout`, and return the
    /// captured outcome. Never returns `Err` — launch failures are folded
    /// into a `-1` return code with the exception text in `stderr`, matching
    /// the contract in §4.1.
    pub async fn run(&self, executable: &Path, args: &[String], timeout: Duration) -> ProcessOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut command = Command::new(executable);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ProcessOutcome {
                    return_code: -1,
                    stdout: String::new(),
                    stderr: err.to_string(),
                    timed_out: false,
                }
            }
        };

        let pid = child.id();
        self.registry.lock().unwrap().insert(
            id,
            LiveChild {
                path: executable.to_path_buf(),
                argv: args.to_vec(),
                start_time: Instant::now(),
                pid,
            },
        );

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // Drain both pipes concurrently with the wait so neither side can
        // deadlock the other on a full pipe buffer.
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let wait_result = tokio_timeout(timeout, child.wait()).await;

        let outcome = match wait_result {
            Ok(Ok(status)) => ProcessOutcome {
                return_code: status.code().unwrap_or(-1),
                stdout: stdout_task.await.unwrap_or_default(),
                stderr: stderr_task.await.unwrap_or_default(),
                timed_out: false,
            },
            Ok(Err(err)) => ProcessOutcome {
                return_code: -1,
                stdout: String::new(),
                stderr: err.to_string(),
                timed_out: false,
            },
            Err(_) => {
                terminate_gracefully_then_forcefully(&mut child).await;
                // Drain whatever partial output the child produced before dying.
                let stdout = stdout_task.await.unwrap_or_default();
                let _ = stderr_task.await;
                ProcessOutcome {
                    return_code: -1,
                    stdout,
                    stderr: "Process timed out".to_string(),
                    timed_out: true,
                }
            }
        };

        self.registry.lock().unwrap().remove(&id);
        outcome
    }

    /// Terminate every currently-registered child in parallel, using the
    /// same two-phase discipline as a single timeout. Takes a snapshot of
    /// the registry before iterating, per the concurrency notes in §5.
    pub async fn kill_all(&self) {
        let pids: Vec<u32> = {
            let registry = self.registry.lock().unwrap();
            registry.values().filter_map(|c| c.pid).collect()
        };
        if pids.is_empty() {
            return;
        }
        tracing::debug!(count = pids.len(), "killing all registered native children");

        let kills = pids.into_iter().map(|pid| async move {
            kill_pid(pid, nix::sys::signal::Signal::SIGTERM);
            tokio::time::sleep(GRACE_PERIOD).await;
            kill_pid(pid, nix::sys::signal::Signal::SIGKILL);
        });
        futures_join_all(kills).await;
        self.registry.lock().unwrap().clear();
    }

    pub fn active_count(&self) -> usize {
        self.registry.lock().unwrap().len()
    }
}

async fn terminate_gracefully_then_forcefully(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        kill_pid(pid, nix::sys::signal::Signal::SIGTERM);
    }
    let graceful = tokio_timeout(GRACE_PERIOD, child.wait()).await;
    if graceful.is_err() {
        if let Some(pid) = child.id() {
            kill_pid(pid, nix::sys::signal::Signal::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

fn kill_pid(pid: u32, signal: nix::sys::signal::Signal) {
    let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(err) = nix::sys::signal::kill(nix_pid, signal) {
        // ESRCH just means the child already exited; anything else is worth a line.
        if err != nix::errno::Errno::ESRCH {
            tracing::warn!(pid, signal = ?signal, error = %err, "failed to signal child process");
        }
    }
}

/// Small local stand-in for `futures::future::join_all` so this module does
/// not need the full `futures` crate for one call site.
async fn futures_join_all<I>(iter: I)
where
    I: IntoIterator,
    I::Item: std::future::Future<Output = ()>,
{
    let handles: Vec<_> = iter.into_iter().map(tokio::spawn).collect();
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_true_returns_zero() {
        let runner = ProcessRunner::new();
        let outcome = runner.run(Path::new("/bin/true"), &[], Duration::from_secs(5)).await;
        assert_eq!(outcome.return_code, 0);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn run_captures_stdout() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("/bin/echo"),
                &["hello".to_string()],
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome.return_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_reports_launch_failure_as_minus_one() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("/definitely/not/a/real/binary"),
                &[],
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome.return_code, -1);
        assert!(!outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn timeout_kills_a_sleeping_child_and_reports_timed_out() {
        let runner = ProcessRunner::new();
        let outcome = runner
            .run(
                Path::new("/bin/sleep"),
                &["10".to_string()],
                Duration::from_secs(1),
            )
            .await;
        assert_eq!(outcome.return_code, -1);
        assert!(outcome.timed_out);
        assert_eq!(outcome.stderr, "Process timed out");
        assert_eq!(runner.active_count(), 0);
    }

    #[tokio::test]
    async fn registry_is_empty_after_a_normal_run_completes() {
        let runner = ProcessRunner::new();
        let _ = runner.run(Path::new("/bin/true"), &[], Duration::from_secs(5)).await;
        assert_eq!(runner.active_count(), 0);
    }
}
