//! Recipe parsing and task expansion (C6).
//!
//! The JSON recipe is deserialized directly into the typed structures below;
//! validation happens exactly once, at [`expand`]. Downstream components
//! never re-inspect raw JSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collaborators::LemmaExtractor;
use crate::error::ExpansionError;
use crate::task::{ExecutableTask, ProverTarget};

/// Default resource budget applied when neither a lemma, task, nor recipe
/// level override is present.
const DEFAULT_MAX_CORES: u32 = 4;
const DEFAULT_MAX_MEMORY_GIB: u32 = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub global_max_cores: u32,
    pub global_max_memory: u32,
    pub default_timeout: u64,
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProverVariant {
    Native { path: String },
    Container { container_image: ContainerImage },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerImage {
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceOverrides {
    pub max_cores: Option<u32>,
    pub max_memory: Option<u32>,
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LemmaSpec {
    pub name: String,
    #[serde(default)]
    pub tamarin_versions: Option<Vec<String>>,
    #[serde(default)]
    pub tamarin_options: Option<Vec<String>>,
    #[serde(default)]
    pub preprocess_flags: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<ResourceOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeTask {
    pub theory_file: PathBuf,
    pub tamarin_versions: Vec<String>,
    pub output_file_prefix: String,
    #[serde(default)]
    pub tamarin_options: Option<Vec<String>>,
    #[serde(default)]
    pub preprocess_flags: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<ResourceOverrides>,
    #[serde(default)]
    pub lemmas: Option<Vec<LemmaSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub config: GlobalConfig,
    pub tamarin_versions: HashMap<String, ProverVariant>,
    pub tasks: HashMap<String, RecipeTask>,
}

impl Recipe {
    pub fn load_json(path: &Path) -> Result<Recipe, ExpansionError> {
        let text = std::fs::read_to_string(path).map_err(|source| ExpansionError::ReadRecipe {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(ExpansionError::ParseRecipe)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), ExpansionError> {
        let text = serde_json::to_string_pretty(self).map_err(ExpansionError::ParseRecipe)?;
        std::fs::write(path, text).map_err(|source| ExpansionError::ReadRecipe {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Run-scoped counter disambiguating colliding task names. Per an open
/// question resolved in the design notes, stability across runs is not
/// promised: this counter is seeded at zero on every call to [`expand`].
struct NameDisambiguator {
    seen: HashMap<String, AtomicU64>,
}

impl NameDisambiguator {
    fn new() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }

    fn disambiguate(&mut self, base: &str) -> String {
        let counter = self
            .seen
            .entry(base.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let n = counter.fetch_add(1, Ordering::Relaxed);
        if n == 0 {
            base.to_string()
        } else {
            format!("{base}_{n}")
        }
    }
}

fn effective_resources(
    global: &GlobalConfig,
    task_override: Option<&ResourceOverrides>,
    lemma_override: Option<&ResourceOverrides>,
    task_name: &str,
) -> (u32, u32, u64) {
    let mut max_cores = lemma_override
        .and_then(|r| r.max_cores)
        .or_else(|| task_override.and_then(|r| r.max_cores))
        .unwrap_or(DEFAULT_MAX_CORES);
    let mut max_memory = lemma_override
        .and_then(|r| r.max_memory)
        .or_else(|| task_override.and_then(|r| r.max_memory))
        .unwrap_or(DEFAULT_MAX_MEMORY_GIB);
    let timeout = lemma_override
        .and_then(|r| r.timeout)
        .or_else(|| task_override.and_then(|r| r.timeout))
        .unwrap_or(global.default_timeout);

    if max_cores > global.global_max_cores {
        warn!(
            task = task_name,
            requested = max_cores,
            cap = global.global_max_cores,
            "clamping max_cores to global cap"
        );
        max_cores = global.global_max_cores;
    }
    if max_memory > global.global_max_memory {
        warn!(
            task = task_name,
            requested = max_memory,
            cap = global.global_max_memory,
            "clamping max_memory to global cap"
        );
        max_memory = global.global_max_memory;
    }
    (max_cores, max_memory, timeout)
}

fn prover_target(variant_name: &str, variant: &ProverVariant) -> Result<ProverTarget, ExpansionError> {
    match variant {
        ProverVariant::Native { path } => {
            if path.trim().is_empty() {
                return Err(ExpansionError::ProverVariantUnusable {
                    variant: variant_name.to_string(),
                });
            }
            let path_buf = PathBuf::from(path);
            if !path_buf.is_file() {
                return Err(ExpansionError::ExecutableNotFound {
                    variant: variant_name.to_string(),
                    path: path_buf,
                });
            }
            Ok(ProverTarget::Native(path_buf))
        }
        ProverVariant::Container { container_image } => {
            if container_image.image.trim().is_empty() {
                return Err(ExpansionError::ProverVariantUnusable {
                    variant: variant_name.to_string(),
                });
            }
            Ok(ProverTarget::Container(container_image.image.clone()))
        }
    }
}

/// Ensure the output directory exists, prompting to wipe it if non-empty and
/// a terminal is attached. Non-interactive contexts default to "do not wipe".
fn prepare_output_directory(dir: &Path) -> Result<(), ExpansionError> {
    if dir.exists() {
        let non_empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if non_empty {
            if atty_is_interactive() {
                let wipe = prompt_wipe(dir);
                if wipe {
                    std::fs::remove_dir_all(dir).map_err(|source| ExpansionError::CreateOutputDir {
                        path: dir.to_path_buf(),
                        source,
                    })?;
                } else {
                    warn!(path = %dir.display(), "output directory is non-empty, continuing without wiping");
                }
            } else {
                warn!(path = %dir.display(), "non-interactive context: defaulting to not wiping non-empty output directory");
            }
        }
    }
    std::fs::create_dir_all(dir).map_err(|source| ExpansionError::CreateOutputDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(not(test))]
fn atty_is_interactive() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

#[cfg(test)]
fn atty_is_interactive() -> bool {
    false
}

fn prompt_wipe(dir: &Path) -> bool {
    use std::io::Write;
    print!(
        "Output directory {} is not empty. Wipe it before running? [y/N] ",
        dir.display()
    );
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Expand a recipe into the concrete tasks the scheduler will run (C6).
pub fn expand(
    recipe: &Recipe,
    lemma_extractor: &dyn LemmaExtractor,
) -> Result<Vec<ExecutableTask>, ExpansionError> {
    prepare_output_directory(&recipe.config.output_directory)?;
    let traces_dir = recipe.config.output_directory.join("traces");
    std::fs::create_dir_all(&traces_dir).map_err(|source| ExpansionError::CreateOutputDir {
        path: traces_dir.clone(),
        source,
    })?;

    let mut disambiguator = NameDisambiguator::new();
    let mut tasks = Vec::new();

    for (task_key, recipe_task) in &recipe.tasks {
        if !recipe_task.theory_file.is_file() {
            return Err(ExpansionError::TheoryFileMissing(recipe_task.theory_file.clone()));
        }

        for variant_name in &recipe_task.tamarin_versions {
            let variant = recipe.tamarin_versions.get(variant_name).ok_or_else(|| {
                ExpansionError::UnknownProverVariant {
                    task: task_key.clone(),
                    variant: variant_name.clone(),
                }
            })?;
            let target = prover_target(variant_name, variant)?;

            let lemma_entries: Vec<(Option<String>, Option<&LemmaSpec>)> = match &recipe_task.lemmas {
                None => vec![(None, None)],
                Some(specs) => {
                    let mut resolved = Vec::new();
                    for spec in specs {
                        if let Some(versions) = &spec.tamarin_versions {
                            if !versions.iter().any(|v| v == variant_name) {
                                continue;
                            }
                        }
                        let available = lemma_extractor.lemma_names(&recipe_task.theory_file)?;
                        let matches: Vec<&String> = available
                            .iter()
                            .filter(|name| *name == &spec.name || name.starts_with(&spec.name))
                            .collect();
                        if matches.is_empty() {
                            warn!(
                                task = task_key.as_str(),
                                lemma_spec = spec.name.as_str(),
                                "no lemma matched this spec, dropping it"
                            );
                            continue;
                        }
                        for name in matches {
                            resolved.push((Some(name.clone()), Some(spec)));
                        }
                    }
                    if resolved.is_empty() {
                        vec![(None, None)]
                    } else {
                        resolved
                    }
                }
            };

            for (lemma, lemma_spec) in lemma_entries {
                let (max_cores, max_memory_gib, timeout_seconds) = effective_resources(
                    &recipe.config,
                    recipe_task.resources.as_ref(),
                    lemma_spec.and_then(|s| s.resources.as_ref()),
                    task_key,
                );

                let mut prover_options = recipe_task.tamarin_options.clone().unwrap_or_default();
                if let Some(spec) = lemma_spec {
                    if let Some(extra) = &spec.tamarin_options {
                        prover_options.extend(extra.clone());
                    }
                }
                let mut preprocess_flags = recipe_task.preprocess_flags.clone().unwrap_or_default();
                if let Some(spec) = lemma_spec {
                    if let Some(extra) = &spec.preprocess_flags {
                        preprocess_flags.extend(extra.clone());
                    }
                }

                let suffix = lemma
                    .as_ref()
                    .map(|l| format!("_{l}"))
                    .unwrap_or_default();
                let output_file = recipe.config.output_directory.join(format!(
                    "{}_{}{}.txt",
                    recipe_task.output_file_prefix, variant_name, suffix
                ));

                let base_name = format!(
                    "{task_key}_{variant_name}{}",
                    lemma.as_ref().map(|l| format!("_{l}")).unwrap_or_default()
                );
                let task_name = disambiguator.disambiguate(&base_name);

                tasks.push(ExecutableTask {
                    task_name,
                    original_task_name: task_key.clone(),
                    prover_variant_name: variant_name.clone(),
                    target: target.clone(),
                    theory_file: recipe_task.theory_file.clone(),
                    output_file,
                    traces_dir: traces_dir.clone(),
                    lemma,
                    prover_options,
                    preprocess_flags,
                    max_cores,
                    max_memory_gib,
                    timeout_seconds,
                });
            }
        }
    }

    Ok(tasks)
}
