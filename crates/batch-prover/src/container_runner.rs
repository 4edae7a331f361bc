//! Container Runner (C2): the containerized analogue of [`crate::process_runner::ProcessRunner`].
//!
//! Drives the locally installed container engine's CLI (`docker`) as a
//! subprocess — `create`, `start`, `wait`, `logs`, `stop`, `rm` — rather than
//! a bundled daemon client library, mirroring how C1 is built and keeping
//! the dependency surface aligned with the rest of the crate.

use std::collections::HashMap as Map;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout as tokio_timeout;

use crate::memory_sampler;
use crate::task::MemoryStats;

/// Configuration for one containerized run.
pub struct ContainerConfig<'a> {
    pub image: &'a str,
    pub argv: &'a [String],
    pub host_working_dir: &'a Path,
    /// Extra read-only binds, e.g. the theory file's own directory when it
    /// lives outside `host_working_dir`. `(host path, absolute mount point)`.
    pub extra_ro_mounts: &'a [(std::path::PathBuf, String)],
    pub memory_limit_mib: u64,
    pub cpu_limit_cores: f64,
    pub timeout: Duration,
    pub env: &'a Map<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContainerOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub memory_stats: Option<MemoryStats>,
}

const WORKDIR: &str = "/work";

/// Launches `config` as a detached container, samples its memory
/// concurrently via C3, and waits up to `config.timeout_seconds`.
pub async fn run(config: ContainerConfig<'_>) -> ContainerOutcome {
    let cpu_period_us: u64 = 100_000;
    let cpu_quota_us = (config.cpu_limit_cores * cpu_period_us as f64).round() as i64;

    let mut create = Command::new("docker");
    create
        .arg("create")
        .arg("--rm=false")
        .arg("-v")
        .arg(format!("{}:{}:rw", config.host_working_dir.display(), WORKDIR))
        .arg("-w")
        .arg(WORKDIR)
        .arg("--memory")
        .arg(format!("{}m", config.memory_limit_mib))
        .arg("--cpu-period")
        .arg(cpu_period_us.to_string())
        .arg("--cpu-quota")
        .arg(cpu_quota_us.to_string());

    for (host_path, mount_point) in config.extra_ro_mounts {
        create
            .arg("-v")
            .arg(format!("{}:{}:ro", host_path.display(), mount_point));
    }

    for (key, value) in config.env {
        create.arg("-e").arg(format!("{key}={value}"));
    }

    create.arg(config.image);
    create.args(config.argv);

    let create_output = match create.output().await {
        Ok(output) => output,
        Err(err) => {
            return ContainerOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: err.to_string(),
                timed_out: false,
                oom_killed: false,
                memory_stats: None,
            }
        }
    };

    if !create_output.status.success() {
        let stderr = String::from_utf8_lossy(&create_output.stderr).into_owned();
        let not_found = stderr.contains("No such image") || stderr.contains("not found");
        return ContainerOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: if not_found {
                format!("image not found: {stderr}")
            } else {
                stderr
            },
            timed_out: false,
            oom_killed: false,
            memory_stats: None,
        };
    }
    let container_id = String::from_utf8_lossy(&create_output.stdout).trim().to_string();

    if Command::new("docker").arg("start").arg(&container_id).status().await.map(|s| !s.success()).unwrap_or(true) {
        cleanup(&container_id).await;
        return ContainerOutcome {
            exit_code: -1,
            stdout: String::new(),
            stderr: "failed to start container".to_string(),
            timed_out: false,
            oom_killed: false,
            memory_stats: None,
        };
    }

    let alive = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let alive_for_sampler = alive.clone();
    let id_for_sampler = container_id.clone();
    let sampler = tokio::spawn(async move {
        memory_sampler::sample_container(&id_for_sampler, || {
            alive_for_sampler.load(std::sync::atomic::Ordering::Relaxed)
        })
        .await
    });

    let wait_result = tokio_timeout(
        config.timeout,
        Command::new("docker").arg("wait").arg(&container_id).output(),
    )
    .await;

    alive.store(false, std::sync::atomic::Ordering::Relaxed);
    let memory_stats = sampler.await.ok().flatten();

    match wait_result {
        Ok(Ok(output)) => {
            let exit_code: i32 = String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse()
                .unwrap_or(-1);
            let (stdout, stderr) = fetch_and_split_logs(&container_id, exit_code).await;
            let oom_killed = inspect_oom_killed(&container_id).await;
            cleanup(&container_id).await;
            ContainerOutcome {
                exit_code,
                stdout,
                stderr,
                timed_out: false,
                oom_killed,
                memory_stats,
            }
        }
        Ok(Err(err)) => {
            cleanup(&container_id).await;
            ContainerOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: err.to_string(),
                timed_out: false,
                oom_killed: false,
                memory_stats,
            }
        }
        Err(_) => {
            let _ = Command::new("docker").arg("stop").arg(&container_id).status().await;
            cleanup(&container_id).await;
            ContainerOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: "Container execution timed out".to_string(),
                timed_out: true,
                oom_killed: false,
                memory_stats,
            }
        }
    }
}

async fn cleanup(container_id: &str) {
    let _ = Command::new("docker").arg("rm").arg("-f").arg(container_id).output().await;
}

async fn inspect_oom_killed(container_id: &str) -> bool {
    let output = Command::new("docker")
        .args(["inspect", "--format", "{{.State.OOMKilled}}", container_id])
        .output()
        .await;
    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "true",
        Err(_) => false,
    }
}

/// Splits retrieved container logs into stdout/stderr using the heuristic
/// from §4.2: on a clean exit, lines that look like an error are routed to
/// stderr and the rest to stdout; on a non-zero exit, everything is stderr.
async fn fetch_and_split_logs(container_id: &str, exit_code: i32) -> (String, String) {
    let output = Command::new("docker").arg("logs").arg(container_id).output().await;
    let logs = match output {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            combined
        }
        Err(err) => return (String::new(), err.to_string()),
    };
    split_logs(&logs, exit_code)
}

fn split_logs(logs: &str, exit_code: i32) -> (String, String) {
    if exit_code != 0 {
        return (String::new(), logs.to_string());
    }
    const ERROR_MARKERS: [&str; 4] = ["error", "exception", "failed", "fatal"];
    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();
    for line in logs.lines() {
        let lower = line.to_ascii_lowercase();
        if ERROR_MARKERS.iter().any(|marker| lower.contains(marker)) {
            stderr_lines.push(line);
        } else {
            stdout_lines.push(line);
        }
    }
    (stdout_lines.join("\n"), stderr_lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_routes_error_lines_to_stderr() {
        let logs = "starting up\nlemma secrecy: verified\nERROR: disk full\nfinished";
        let (stdout, stderr) = split_logs(logs, 0);
        assert!(stdout.contains("starting up"));
        assert!(stdout.contains("finished"));
        assert!(stderr.contains("disk full"));
        assert!(!stdout.contains("disk full"));
    }

    #[test]
    fn nonzero_exit_routes_everything_to_stderr() {
        let logs = "starting up\nlemma secrecy: verified";
        let (stdout, stderr) = split_logs(logs, 1);
        assert!(stdout.is_empty());
        assert!(stderr.contains("starting up"));
    }
}
