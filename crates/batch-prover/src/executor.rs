//! Task Executor (C7): executes one expanded task end to end — cache
//! lookup, command construction, dispatch to C1/C2, outcome classification,
//! artifact persistence, and cache update.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::{fingerprint, FingerprintInput, ResultCache};
use crate::collaborators::{OutputParser, ParsedOutcome, VersionFilter};
use crate::container_runner::{self, ContainerConfig};
use crate::error::CacheError;
use crate::process_runner::ProcessRunner;
use crate::recipe::{ContainerImage, ProverVariant};
use crate::report;
use crate::task::{ExecutableTask, ProverTarget, TaskResult, TaskStatus};

/// Collaborators a single [`execute`] call needs. Grouped so the scheduler
/// can hand every spawned task a cheap `Clone` of shared, `Arc`-wrapped
/// state instead of threading five parameters through.
#[derive(Clone)]
pub struct ExecutorContext {
    pub cache: Arc<ResultCache>,
    pub process_runner: Arc<ProcessRunner>,
    pub version_filter: Arc<dyn VersionFilter>,
    pub output_parser: Arc<dyn OutputParser>,
    pub output_directory: PathBuf,
    /// Flipped by the scheduler's signal handler. When set, a non-clean
    /// exit is classified SIGNAL_INTERRUPTED rather than FAILED/TIMEOUT.
    pub interrupted: Arc<AtomicBool>,
}

fn target_identity(target: &ProverTarget) -> String {
    match target {
        ProverTarget::Native(path) => path.display().to_string(),
        ProverTarget::Container(image) => image.clone(),
    }
}

/// Paths as they appear inside a container, once the theory file's own
/// directory and the output directory are bind-mounted.
struct ContainerPaths {
    theory: String,
    output_file: String,
    traces_dir: String,
}

/// Builds the argv for one task per §4.7 step 2, in either native or
/// containerized shape. `argv[0]` is the executable/image identity and is
/// stripped by the caller before handing the rest to a runner.
fn build_argv(task: &ExecutableTask, container_paths: Option<&ContainerPaths>) -> Vec<String> {
    let mut argv = Vec::new();

    let (identity, theory, output_file, traces_dir) = match container_paths {
        Some(paths) => (
            target_identity(&task.target),
            paths.theory.clone(),
            paths.output_file.clone(),
            paths.traces_dir.clone(),
        ),
        None => (
            target_identity(&task.target),
            task.theory_file.display().to_string(),
            task.output_file.display().to_string(),
            task.traces_dir.display().to_string(),
        ),
    };

    argv.push(identity);
    argv.push("+RTS".to_string());
    argv.push(format!("-N{}", task.max_cores));
    argv.push("-RTS".to_string());
    argv.push(theory);
    if let Some(lemma) = &task.lemma {
        argv.push(format!("--prove={lemma}"));
    }
    argv.extend(task.prover_options.iter().cloned());
    for flag in &task.preprocess_flags {
        argv.push(format!("-D={flag}"));
    }
    argv.push(format!("--output-json={traces_dir}/{}.json", task.task_name));
    argv.push(format!("--output-dot={traces_dir}/{}.dot", task.task_name));
    argv.push(format!("--output={output_file}"));

    argv
}

/// Synthesizes a [`ProverVariant`] from an already-expanded task's target,
/// solely so the pluggable [`VersionFilter`] (whose contract is expressed in
/// terms of the recipe-level type) can be called post-expansion without the
/// executor needing to carry the original recipe around.
fn synthetic_variant(target: &ProverTarget) -> ProverVariant {
    match target {
        ProverTarget::Native(path) => ProverVariant::Native {
            path: path.display().to_string(),
        },
        ProverTarget::Container(image) => ProverVariant::Container {
            container_image: ContainerImage { image: image.clone() },
        },
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Execute one task end to end (§4.7). Returns the [`TaskResult`] and, when
/// a fresh artifact was written, its path (a cache hit writes nothing).
pub async fn execute(ctx: &ExecutorContext, task: &ExecutableTask) -> (TaskResult, Option<PathBuf>) {
    let span = tracing::info_span!("task", task_id = %task.task_name);
    let _enter = span.enter();

    let fp_input = FingerprintInput {
        target_identity: &target_identity(&task.target),
        theory_file: &task.theory_file,
        lemma: task.lemma.as_deref(),
        prover_options: &task.prover_options,
        preprocess_flags: &task.preprocess_flags,
        max_cores: task.max_cores,
        max_memory_gib: task.max_memory_gib,
        timeout_seconds: task.timeout_seconds,
    };

    let fp = fingerprint(&fp_input).ok();

    if let Some(fp) = fp {
        if let Ok(Some(cached)) = ctx.cache.lookup(&fp) {
            tracing::debug!("cache hit");
            return (cached, None);
        }
    } else {
        tracing::warn!("failed to compute fingerprint, running without cache");
    }

    let (result, parsed) = dispatch_and_classify(ctx, task).await;

    if let Some(fp) = fp {
        if result.status.is_cacheable() {
            match ctx.cache.store(&fp, &result, vec![task.output_file.clone()]) {
                Ok(()) => {}
                Err(CacheError::RefusedInterrupted(_)) => {}
                Err(err) => tracing::warn!(error = %err, "failed to persist cache entry"),
            }
        }
    }

    let artifact_path = match report::write_task_artifact(&ctx.output_directory, task, &result, &parsed) {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::warn!(error = %err, "failed to write per-task artifact");
            None
        }
    };

    (result, artifact_path)
}

async fn dispatch_and_classify(ctx: &ExecutorContext, task: &ExecutableTask) -> (TaskResult, ParsedOutcome) {
    let start_unix_ms = now_unix_ms();
    let start = std::time::Instant::now();

    let variant = synthetic_variant(&task.target);

    let (return_code, stdout, stderr, timed_out, oom_evidence, memory_stats) = match &task.target {
        ProverTarget::Native(path) => {
            let full_argv = ctx.version_filter.filter(&variant, build_argv(task, None));
            let args: Vec<String> = full_argv.into_iter().skip(1).collect();
            let outcome = ctx
                .process_runner
                .run(path, &args, Duration::from_secs(task.timeout_seconds))
                .await;
            let oom = outcome.return_code != 0
                && (outcome.stderr.to_lowercase().contains("out of memory")
                    || outcome.stderr.to_lowercase().contains("oom"));
            (
                outcome.return_code,
                outcome.stdout,
                outcome.stderr,
                outcome.timed_out,
                oom,
                None,
            )
        }
        ProverTarget::Container(image) => {
            let container_paths = ContainerPaths {
                theory: format!("/input/{}", file_name(&task.theory_file)),
                output_file: format!("/work/{}", file_name(&task.output_file)),
                traces_dir: "/work/traces".to_string(),
            };
            let full_argv = ctx
                .version_filter
                .filter(&variant, build_argv(task, Some(&container_paths)));
            let args: Vec<String> = full_argv.into_iter().skip(1).collect();

            let theory_dir = task
                .theory_file
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            let extra_mounts = vec![(theory_dir, "/input".to_string())];
            let env = std::collections::HashMap::new();

            let config = ContainerConfig {
                image,
                argv: &args,
                host_working_dir: &ctx.output_directory,
                extra_ro_mounts: &extra_mounts,
                memory_limit_mib: (task.max_memory_gib as u64) * 1024,
                cpu_limit_cores: task.max_cores as f64,
                timeout: Duration::from_secs(task.timeout_seconds),
                env: &env,
            };
            let outcome = container_runner::run(config).await;
            (
                outcome.exit_code,
                outcome.stdout,
                outcome.stderr,
                outcome.timed_out,
                outcome.oom_killed,
                outcome.memory_stats,
            )
        }
    };

    let end_unix_ms = now_unix_ms();
    let duration = start.elapsed();

    let memory_peak_exceeds_cap = memory_stats
        .map(|stats| stats.peak_mib >= task.max_memory_gib as f64 * 1024.0)
        .unwrap_or(false);

    let was_interrupted = ctx.interrupted.load(Ordering::SeqCst) && return_code != 0;

    let status = if was_interrupted {
        TaskStatus::SignalInterrupted
    } else if timed_out {
        TaskStatus::Timeout
    } else if memory_peak_exceeds_cap || oom_evidence {
        TaskStatus::MemoryLimitExceeded
    } else if return_code == 0 {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    let parsed = if status == TaskStatus::Completed {
        ctx.output_parser.parse(&stdout)
    } else {
        ParsedOutcome::default()
    };

    let result = TaskResult {
        task_id: task.task_name.clone(),
        status,
        return_code: Some(return_code),
        stdout,
        stderr,
        start_time_unix_ms: start_unix_ms,
        end_time_unix_ms: end_unix_ms,
        duration,
        memory_stats,
    };

    match status {
        TaskStatus::Completed => tracing::info!(duration_s = duration.as_secs_f64(), "task completed"),
        TaskStatus::Timeout => tracing::warn!("task timed out"),
        TaskStatus::MemoryLimitExceeded => tracing::error!("task exceeded its memory cap"),
        TaskStatus::SignalInterrupted => tracing::warn!("task interrupted by signal"),
        TaskStatus::Failed => tracing::error!(return_code, "task failed"),
        _ => {}
    }

    (result, parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LineScanOutputParser, NoopVersionFilter};

    fn make_ctx(output_directory: PathBuf) -> ExecutorContext {
        ExecutorContext {
            cache: Arc::new(ResultCache::new(output_directory.join("cache")).unwrap()),
            process_runner: Arc::new(ProcessRunner::new()),
            version_filter: Arc::new(NoopVersionFilter),
            output_parser: Arc::new(LineScanOutputParser),
            output_directory,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn sample_task(theory_file: PathBuf, executable: PathBuf, output_dir: &std::path::Path) -> ExecutableTask {
        ExecutableTask {
            task_name: "protocol_stable".to_string(),
            original_task_name: "protocol".to_string(),
            prover_variant_name: "stable".to_string(),
            target: ProverTarget::Native(executable),
            theory_file,
            output_file: output_dir.join("out.txt"),
            traces_dir: output_dir.join("traces"),
            lemma: None,
            prover_options: vec![],
            preprocess_flags: vec![],
            max_cores: 2,
            max_memory_gib: 4,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn completed_run_is_cached_and_served_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        std::fs::create_dir_all(dir.path().join("traces")).unwrap();
        let ctx = make_ctx(dir.path().join("output"));
        let task = sample_task(theory, PathBuf::from("/bin/true"), dir.path());

        let (result1, _artifact) = execute(&ctx, &task).await;
        assert_eq!(result1.status, TaskStatus::Completed);

        let (result2, artifact2) = execute(&ctx, &task).await;
        assert_eq!(result2.status, TaskStatus::Completed);
        assert!(artifact2.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_classified_failed() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        std::fs::create_dir_all(dir.path().join("traces")).unwrap();
        let ctx = make_ctx(dir.path().join("output"));
        let task = sample_task(theory, PathBuf::from("/bin/false"), dir.path());

        let (result, _) = execute(&ctx, &task).await;
        assert_eq!(result.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn timeout_is_classified_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        std::fs::create_dir_all(dir.path().join("traces")).unwrap();
        let ctx = make_ctx(dir.path().join("output"));
        let mut task = sample_task(theory, PathBuf::from("/bin/sleep"), dir.path());
        task.timeout_seconds = 1;
        task.prover_options = vec!["10".to_string()];

        let (result, _) = execute(&ctx, &task).await;
        assert_eq!(result.status, TaskStatus::Timeout);
    }

    #[test]
    fn build_argv_includes_cores_lemma_and_output_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = sample_task(
            dir.path().join("t.spthy"),
            PathBuf::from("/usr/bin/tamarin-prover"),
            dir.path(),
        );
        task.lemma = Some("secrecy".to_string());
        task.preprocess_flags = vec!["DEBUG".to_string()];
        let argv = build_argv(&task, None);
        assert_eq!(argv[0], "/usr/bin/tamarin-prover");
        assert!(argv.contains(&"-N2".to_string()));
        assert!(argv.contains(&"--prove=secrecy".to_string()));
        assert!(argv.contains(&"-D=DEBUG".to_string()));
        assert!(argv.iter().any(|a| a.starts_with("--output-json=")));
        assert!(argv.iter().any(|a| a.starts_with("--output=")));
    }
}
