//! Per-task JSON artifacts and the aggregate execution report (§6).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collaborators::ParsedOutcome;
use crate::error::ReportError;
use crate::recipe::GlobalConfig;
use crate::task::{ExecutableTask, MemoryStats, TaskResult, TaskStatus};

/// `wrapper_measures` block shared by both per-task artifact schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapperMeasures {
    pub time: f64,
    pub avg_memory: f64,
    pub peak_memory: f64,
}

impl WrapperMeasures {
    fn from_result(result: &TaskResult) -> Self {
        let stats = result.memory_stats.unwrap_or(MemoryStats {
            peak_mib: 0.0,
            mean_mib: 0.0,
        });
        Self {
            time: result.duration.as_secs_f64(),
            avg_memory: stats.mean_mib,
            peak_memory: stats.peak_mib,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LemmaOutcome {
    pub steps: u32,
    pub analysis_type: String,
}

/// Successful per-task artifact (`{output_directory}/success/{task_id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessArtifact {
    pub task_id: String,
    pub tamarin_timing: f64,
    pub wrapper_measures: WrapperMeasures,
    pub verified_lemma: std::collections::HashMap<String, LemmaOutcome>,
    pub falsified_lemma: std::collections::HashMap<String, LemmaOutcome>,
    pub unterminated_lemma: Vec<String>,
    pub warnings: Vec<String>,
    pub output_spthy: String,
}

/// Failed per-task artifact (`{output_directory}/failed/{task_id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedArtifact {
    pub task_id: String,
    pub wrapper_measures: WrapperMeasures,
    pub return_code: i32,
    pub last_stderr_lines: Vec<String>,
}

/// Writes the per-task JSON summary into `success/` or `failed/` under
/// `output_directory`, per §4.7 step 5. Returns the path written.
pub fn write_task_artifact(
    output_directory: &Path,
    task: &ExecutableTask,
    result: &TaskResult,
    parsed: &ParsedOutcome,
) -> Result<PathBuf, ReportError> {
    let measures = WrapperMeasures::from_result(result);

    if result.status == TaskStatus::Completed {
        let dir = output_directory.join("success");
        std::fs::create_dir_all(&dir).map_err(|source| ReportError::WriteArtifact {
            path: dir.clone(),
            source,
        })?;
        let artifact = SuccessArtifact {
            task_id: task.task_name.clone(),
            tamarin_timing: result.duration.as_secs_f64(),
            wrapper_measures: measures,
            verified_lemma: parsed
                .verified
                .iter()
                .map(|(name, steps)| {
                    (
                        name.clone(),
                        LemmaOutcome {
                            steps: *steps,
                            analysis_type: "all-traces".to_string(),
                        },
                    )
                })
                .collect(),
            falsified_lemma: parsed
                .falsified
                .iter()
                .map(|(name, steps)| {
                    (
                        name.clone(),
                        LemmaOutcome {
                            steps: *steps,
                            analysis_type: "all-traces".to_string(),
                        },
                    )
                })
                .collect(),
            unterminated_lemma: parsed.unterminated.clone(),
            warnings: parsed.warnings.clone(),
            output_spthy: task.output_file.display().to_string(),
        };
        let path = dir.join(format!("{}.json", task.task_name));
        let text = serde_json::to_string_pretty(&artifact).map_err(ReportError::Serialize)?;
        std::fs::write(&path, text).map_err(|source| ReportError::WriteArtifact {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    } else {
        let dir = output_directory.join("failed");
        std::fs::create_dir_all(&dir).map_err(|source| ReportError::WriteArtifact {
            path: dir.clone(),
            source,
        })?;
        let last_stderr_lines: Vec<String> = result
            .stderr
            .lines()
            .rev()
            .take(10)
            .map(str::to_string)
            .rev()
            .collect();
        let artifact = FailedArtifact {
            task_id: task.task_name.clone(),
            wrapper_measures: measures,
            return_code: result.return_code.unwrap_or(-1),
            last_stderr_lines,
        };
        let path = dir.join(format!("{}.json", task.task_name));
        let text = serde_json::to_string_pretty(&artifact).map_err(ReportError::Serialize)?;
        std::fs::write(&path, text).map_err(|source| ReportError::WriteArtifact {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Aggregate statistics block of the execution report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub successful_tasks_percentage: f64,
    pub total_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultSummary {
    pub lemma: Option<String>,
    pub tamarin_version: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReportEntry {
    pub name: String,
    pub theory_file: PathBuf,
    pub lemmas: Vec<Option<String>>,
    pub tamarin_versions: Vec<String>,
    pub results: Vec<TaskResultSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub config: GlobalConfig,
    pub statistics: Statistics,
    pub tasks: Vec<TaskReportEntry>,
}

/// In-memory outcome of a full scheduler run (§4.8). Intentionally does not
/// include SIGNAL_INTERRUPTED results among `task_results`: those are
/// neither cached nor reported (§5).
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub task_results: Vec<(ExecutableTask, TaskResult)>,
    pub total_duration: std::time::Duration,
}

impl ExecutionSummary {
    /// Groups by `original_task_name` and builds the aggregate report
    /// described in §6. `config` is the recipe's global configuration,
    /// included verbatim for reproducibility.
    pub fn to_report(&self, config: &GlobalConfig) -> ExecutionReport {
        let mut by_task: std::collections::HashMap<String, TaskReportEntry> =
            std::collections::HashMap::new();

        for (task, result) in &self.task_results {
            let entry = by_task
                .entry(task.original_task_name.clone())
                .or_insert_with(|| TaskReportEntry {
                    name: task.original_task_name.clone(),
                    theory_file: task.theory_file.clone(),
                    lemmas: Vec::new(),
                    tamarin_versions: Vec::new(),
                    results: Vec::new(),
                });
            if !entry.lemmas.contains(&task.lemma) {
                entry.lemmas.push(task.lemma.clone());
            }
            if !entry.tamarin_versions.contains(&task.prover_variant_name) {
                entry.tamarin_versions.push(task.prover_variant_name.clone());
            }
            entry.results.push(TaskResultSummary {
                lemma: task.lemma.clone(),
                tamarin_version: task.prover_variant_name.clone(),
                status: result.status,
            });
        }

        let successful_tasks_percentage = if self.total > 0 {
            self.successful as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };

        ExecutionReport {
            config: config.clone(),
            statistics: Statistics {
                total_tasks: self.total,
                successful_tasks: self.successful,
                failed_tasks: self.failed,
                successful_tasks_percentage,
                total_duration: self.total_duration.as_secs_f64(),
            },
            tasks: by_task.into_values().collect(),
        }
    }
}

/// Writes the aggregate execution report to `{output_directory}/execution_report.json`.
pub fn write_execution_report(output_directory: &Path, report: &ExecutionReport) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(output_directory).map_err(|source| ReportError::WriteArtifact {
        path: output_directory.to_path_buf(),
        source,
    })?;
    let path = output_directory.join("execution_report.json");
    let text = serde_json::to_string_pretty(report).map_err(ReportError::Serialize)?;
    std::fs::write(&path, text).map_err(|source| ReportError::WriteArtifact {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
