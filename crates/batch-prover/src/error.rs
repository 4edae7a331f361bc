//! Error taxonomy for the batch-prover pipeline.
//!
//! Each module that can fail owns a dedicated error enum deriving
//! [`std::error::Error`] via `thiserror`. [`BatchError`] aggregates the ones
//! that can abort a run before scheduling begins; per-task failures are
//! never represented as a propagated `Err` — they live in
//! [`crate::task::TaskStatus`] instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or expanding a recipe (C6).
#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("failed to read recipe file {path}: {source}")]
    ReadRecipe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse recipe JSON: {0}")]
    ParseRecipe(#[source] serde_json::Error),

    #[error("theory file does not exist or is not a regular file: {0}")]
    TheoryFileMissing(PathBuf),

    #[error("task '{task}' references undefined prover variant '{variant}'")]
    UnknownProverVariant { task: String, variant: String },

    #[error("prover variant '{variant}' has neither a usable executable path nor a container image")]
    ProverVariantUnusable { variant: String },

    #[error("prover variant '{variant}' executable does not exist or is not a regular file: {path}")]
    ExecutableNotFound { variant: String, path: PathBuf },

    #[error("failed to create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lemma extraction failed for {path}: {source}")]
    LemmaExtraction {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the on-disk result cache (C5).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to hash theory file {path}: {source}")]
    HashTheoryFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache directory {path} is not usable: {source}")]
    CacheDirUnusable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize cache entry at {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("refusing to cache a SIGNAL_INTERRUPTED result for task '{0}'")]
    RefusedInterrupted(String),
}

/// Errors raised by the process/container runners (C1/C2) that are not
/// themselves task outcomes (launch failures are folded into `TaskStatus`,
/// these are the ones that indicate a broken runner rather than a failed task).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send termination signal to pid {pid}: {source}")]
    Signal { pid: i32, source: nix::Error },

    #[error("container engine invocation failed: {0}")]
    ContainerEngine(String),
}

/// Errors raised while writing per-task artifacts or the aggregate report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write artifact {path}: {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Top-level error returned by the CLI binary's `main`. Only configuration
/// and internal failures discovered before scheduling starts propagate here;
/// everything else is captured as task-level data.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("configuration error: {0}")]
    Config(String),
}
