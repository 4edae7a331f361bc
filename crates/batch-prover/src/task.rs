//! Core task and result types shared by every pipeline stage.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which backend an [`ExecutableTask`] runs against. Exactly one of these is
/// ever constructed for a given task — modeled as an enum rather than two
/// `Option` fields so "both set" and "neither set" are unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProverTarget {
    /// Run the prover as a native subprocess at this executable path.
    Native(PathBuf),
    /// Run the prover inside a container built from this image reference.
    Container(String),
}

impl ProverTarget {
    pub fn is_container(&self) -> bool {
        matches!(self, ProverTarget::Container(_))
    }
}

/// A fully resolved unit of work, produced by expansion (C6) and consumed by
/// the scheduler (C8) and executor (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableTask {
    /// Unique identifier within a run.
    pub task_name: String,
    /// The recipe key this task was expanded from.
    pub original_task_name: String,
    /// Which prover variant (alias) this task targets.
    pub prover_variant_name: String,
    pub target: ProverTarget,
    pub theory_file: PathBuf,
    pub output_file: PathBuf,
    pub traces_dir: PathBuf,
    /// Name of the lemma to prove, or absent (meaning "prove all").
    pub lemma: Option<String>,
    pub prover_options: Vec<String>,
    pub preprocess_flags: Vec<String>,
    pub max_cores: u32,
    pub max_memory_gib: u32,
    pub timeout_seconds: u64,
}

impl ExecutableTask {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Terminal (or transient, for `PENDING`/`RUNNING`) state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    MemoryLimitExceeded,
    SignalInterrupted,
}

impl TaskStatus {
    /// Every status other than `Completed` counts against the failure tally
    /// in an [`crate::report::ExecutionSummary`].
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed
                | TaskStatus::Timeout
                | TaskStatus::MemoryLimitExceeded
                | TaskStatus::SignalInterrupted
        )
    }

    /// Only non-interrupted terminal statuses are eligible for caching.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, TaskStatus::SignalInterrupted | TaskStatus::Pending | TaskStatus::Running)
    }
}

/// Peak and mean resident memory observed while a task's child was alive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryStats {
    pub peak_mib: f64,
    pub mean_mib: f64,
}

/// Outcome of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub start_time_unix_ms: u64,
    pub end_time_unix_ms: u64,
    pub duration: Duration,
    pub memory_stats: Option<MemoryStats>,
}

impl TaskResult {
    pub fn duration_is_consistent(&self) -> bool {
        self.end_time_unix_ms >= self.start_time_unix_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_is_not_a_failure() {
        assert!(!TaskStatus::Completed.is_failure());
    }

    #[test]
    fn timeout_and_oom_and_interrupted_are_failures() {
        assert!(TaskStatus::Timeout.is_failure());
        assert!(TaskStatus::MemoryLimitExceeded.is_failure());
        assert!(TaskStatus::SignalInterrupted.is_failure());
        assert!(TaskStatus::Failed.is_failure());
    }

    #[test]
    fn only_interrupted_and_transient_statuses_are_uncacheable() {
        assert!(!TaskStatus::SignalInterrupted.is_cacheable());
        assert!(!TaskStatus::Pending.is_cacheable());
        assert!(!TaskStatus::Running.is_cacheable());
        assert!(TaskStatus::Completed.is_cacheable());
        assert!(TaskStatus::Failed.is_cacheable());
        assert!(TaskStatus::Timeout.is_cacheable());
        assert!(TaskStatus::MemoryLimitExceeded.is_cacheable());
    }

    #[test]
    fn prover_target_distinguishes_native_and_container() {
        assert!(!ProverTarget::Native(PathBuf::from("/bin/tamarin-prover")).is_container());
        assert!(ProverTarget::Container("tamarin-prover:test".to_string()).is_container());
    }
}
