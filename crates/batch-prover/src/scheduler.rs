//! Scheduler (C8): the dependency-free, resource-bounded control loop that
//! turns a pool of expanded tasks into an [`ExecutionSummary`].
//!
//! Runs as one async task driving admission/reaping while each in-flight
//! task's executor runs as its own spawned task (§5). The resource pool is
//! touched only from this loop, so it needs no synchronization; the
//! process/container registries the executors reach into are independently
//! guarded (see `process_runner::ProcessRunner`).

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::executor::{self, ExecutorContext};
use crate::report::ExecutionSummary;
use crate::resource_manager::ResourceManager;
use crate::task::{ExecutableTask, TaskResult, TaskStatus};

/// Cadence for progress notifications, bounded by a monotonic timestamp
/// rather than a loop-iteration count (§4.8 step 4).
const PROGRESS_INTERVAL: Duration = Duration::from_secs(3);
/// Sleep between ticks when nothing needs immediate attention (§4.8 step 5).
const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Drain window for a graceful shutdown.
const GRACEFUL_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Drain window after a forceful shutdown has killed everything in flight.
const FORCE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the resource pool and the collaborators every executor needs, and
/// drives tasks from `pending` through to a terminal status.
pub struct Scheduler {
    resource_manager: ResourceManager,
    executor_context: ExecutorContext,
}

impl Scheduler {
    pub fn new(resource_manager: ResourceManager, executor_context: ExecutorContext) -> Self {
        Self {
            resource_manager,
            executor_context,
        }
    }

    /// Runs `tasks` to completion (or until interrupted) and returns the
    /// resulting summary. SIGNAL_INTERRUPTED outcomes are excluded from the
    /// summary entirely, per §4.8 and §5: they are neither cached nor
    /// reported, only logged.
    pub async fn run(mut self, tasks: Vec<ExecutableTask>) -> ExecutionSummary {
        let run_start = Instant::now();
        let mut pending: Vec<ExecutableTask> = tasks;
        let mut running: JoinSet<(ExecutableTask, TaskResult)> = JoinSet::new();

        let shutdown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let force_shutdown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        self.install_signal_handler(shutdown.clone(), force_shutdown.clone());

        let mut task_results: Vec<(ExecutableTask, TaskResult)> = Vec::new();
        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut last_progress = Instant::now();

        loop {
            if force_shutdown.load(Ordering::SeqCst) {
                tracing::warn!("force shutdown requested, abandoning pending queue");
                break;
            }

            if !shutdown.load(Ordering::SeqCst) {
                self.admit_schedulable(&mut pending, &mut running);
            }

            self.reap_ready(&mut running, &mut task_results, &mut successful, &mut failed);

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                tracing::info!(
                    pending = pending.len(),
                    running = running.len(),
                    completed = task_results.len(),
                    cores_free = self.resource_manager.available_cores(),
                    memory_free_gib = self.resource_manager.available_memory_gib(),
                    "scheduler progress"
                );
                last_progress = Instant::now();
            }

            // Under a graceful shutdown, admission above is paused for good, so
            // pending never drains on its own; only wait on running tasks then.
            if running.is_empty() && (pending.is_empty() || shutdown.load(Ordering::SeqCst)) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
                joined = running.join_next(), if !running.is_empty() => {
                    self.record_joined(joined, &mut task_results, &mut successful, &mut failed);
                }
            }
        }

        if force_shutdown.load(Ordering::SeqCst) {
            self.executor_context.interrupted.store(true, Ordering::SeqCst);
            self.executor_context.process_runner.kill_all().await;
            let _ = tokio::time::timeout(FORCE_DRAIN_TIMEOUT, async {
                while let Some(joined) = running.join_next().await {
                    self.record_joined(Some(joined), &mut task_results, &mut successful, &mut failed);
                }
            })
            .await;
            running.shutdown().await;
            pending.clear();
        } else if shutdown.load(Ordering::SeqCst) && !running.is_empty() {
            tracing::info!(count = running.len(), "graceful shutdown: draining in-flight tasks");
            let drained = tokio::time::timeout(GRACEFUL_DRAIN_TIMEOUT, async {
                while let Some(joined) = running.join_next().await {
                    self.record_joined(Some(joined), &mut task_results, &mut successful, &mut failed);
                }
            })
            .await;
            if drained.is_err() {
                tracing::warn!("graceful drain window elapsed with tasks still running");
            }
            running.shutdown().await;
        }

        if shutdown.load(Ordering::SeqCst) && !pending.is_empty() {
            tracing::warn!(count = pending.len(), "graceful shutdown: abandoning never-admitted tasks");
            pending.clear();
        }

        ExecutionSummary {
            total: task_results.len(),
            successful,
            failed,
            task_results,
            total_duration: run_start.elapsed(),
        }
    }

    fn admit_schedulable(&mut self, pending: &mut Vec<ExecutableTask>, running: &mut JoinSet<(ExecutableTask, TaskResult)>) {
        let selected_names: HashSet<String> = self
            .resource_manager
            .select_schedulable(pending)
            .into_iter()
            .map(|t| t.task_name.clone())
            .collect();
        if selected_names.is_empty() {
            return;
        }

        let drained = std::mem::take(pending);
        let (to_admit, still_pending): (Vec<_>, Vec<_>) =
            drained.into_iter().partition(|t| selected_names.contains(&t.task_name));
        *pending = still_pending;

        for task in to_admit {
            if !self.resource_manager.admit(&task) {
                // Lost a race against a concurrent pool change; put it back for next tick.
                pending.push(task);
                continue;
            }
            tracing::info!(task_id = %task.task_name, "task admitted");
            let ctx = self.executor_context.clone();
            running.spawn(async move {
                let (result, _artifact_path) = executor::execute(&ctx, &task).await;
                (task, result)
            });
        }
    }

    fn reap_ready(
        &mut self,
        running: &mut JoinSet<(ExecutableTask, TaskResult)>,
        task_results: &mut Vec<(ExecutableTask, TaskResult)>,
        successful: &mut usize,
        failed: &mut usize,
    ) {
        while let Some(joined) = running.try_join_next() {
            self.record_joined(Some(joined), task_results, successful, failed);
        }
    }

    fn record_joined(
        &mut self,
        joined: Option<Result<(ExecutableTask, TaskResult), tokio::task::JoinError>>,
        task_results: &mut Vec<(ExecutableTask, TaskResult)>,
        successful: &mut usize,
        failed: &mut usize,
    ) {
        let Some(joined) = joined else { return };
        let (task, result) = match joined {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(error = %err, "executor task panicked");
                return;
            }
        };
        self.resource_manager.release(&task);

        if result.status == TaskStatus::SignalInterrupted {
            tracing::warn!(task_id = %task.task_name, "task interrupted, excluded from report");
            return;
        }

        match result.status {
            TaskStatus::Completed => tracing::info!(task_id = %task.task_name, "task reaped: completed"),
            _ => tracing::warn!(task_id = %task.task_name, status = ?result.status, "task reaped: failed"),
        }

        if result.status.is_failure() {
            *failed += 1;
        } else {
            *successful += 1;
        }
        task_results.push((task, result));
    }

    /// Installs a Ctrl-C handler: first delivery sets `shutdown`, second
    /// delivery (within the same run) sets `force_shutdown` and marks the
    /// executor context as interrupted so in-flight tasks are classified
    /// SIGNAL_INTERRUPTED rather than FAILED when they return.
    fn install_signal_handler(
        &self,
        shutdown: std::sync::Arc<std::sync::atomic::AtomicBool>,
        force_shutdown: std::sync::Arc<std::sync::atomic::AtomicBool>,
    ) {
        let interrupted = self.executor_context.interrupted.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if shutdown.load(Ordering::SeqCst) {
                    tracing::warn!("second interrupt received, forcing shutdown");
                    force_shutdown.store(true, Ordering::SeqCst);
                    interrupted.store(true, Ordering::SeqCst);
                } else {
                    tracing::warn!("interrupt received, draining running tasks gracefully");
                    shutdown.store(true, Ordering::SeqCst);
                }
            }
        });
    }
}
