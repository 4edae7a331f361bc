//! Result cache (C5): a content-addressed, disk-persistent store from task
//! fingerprint to prior [`TaskResult`].
//!
//! Each entry is one JSON file named by its hex-encoded SHA-256 fingerprint,
//! living under a stable per-user directory so the cache survives process
//! restarts. The fingerprint covers every field that affects a task's
//! output: prover target, theory file contents, lemma, ordered options and
//! flags, and resource caps — flip any of them and the fingerprint changes.
//!
//! # Environment variable
//!
//! `BATCH_PROVER_CACHE_DIR` — overrides the default per-user cache directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::task::{TaskResult, TaskStatus};

/// A 32-byte SHA-256 digest used as a cache key.
pub type Fingerprint = [u8; 32];

/// The fields that feed [`fingerprint`], gathered so callers don't have to
/// reconstruct an [`crate::task::ExecutableTask`] just to compute a key.
pub struct FingerprintInput<'a> {
    pub target_identity: &'a str,
    pub theory_file: &'a Path,
    pub lemma: Option<&'a str>,
    pub prover_options: &'a [String],
    pub preprocess_flags: &'a [String],
    pub max_cores: u32,
    pub max_memory_gib: u32,
    pub timeout_seconds: u64,
}

/// Compute the content-addressed fingerprint for a task's inputs.
///
/// Reads the theory file in chunks to avoid holding the whole file in memory
/// for pathologically large inputs. Surfaces a [`CacheError`] rather than
/// silently skipping a missing theory file.
pub fn fingerprint(input: &FingerprintInput) -> Result<Fingerprint, CacheError> {
    use std::io::Read;

    let mut theory_hasher = Sha256::new();
    let mut file = std::fs::File::open(input.theory_file).map_err(|source| CacheError::HashTheoryFile {
        path: input.theory_file.to_path_buf(),
        source,
    })?;
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf).map_err(|source| CacheError::HashTheoryFile {
            path: input.theory_file.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        theory_hasher.update(&buf[..n]);
    }
    let theory_digest = theory_hasher.finalize();

    let mut hasher = Sha256::new();
    hasher.update(input.target_identity.as_bytes());
    hasher.update(b"\0");
    hasher.update(theory_digest);
    hasher.update(b"\0");
    hasher.update(input.lemma.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    for opt in input.prover_options {
        hasher.update(opt.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.update(b"\0");
    for flag in input.preprocess_flags {
        hasher.update(flag.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.update(b"\0");
    hasher.update(input.max_cores.to_le_bytes());
    hasher.update(input.max_memory_gib.to_le_bytes());
    hasher.update(input.timeout_seconds.to_le_bytes());

    Ok(hasher.finalize().into())
}

pub fn fingerprint_hex(fp: &Fingerprint) -> String {
    fp.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CacheRecord {
    result: TaskResult,
    artifact_paths: Vec<PathBuf>,
}

/// Disk-backed, content-addressed result cache.
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::CacheDirUnusable {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Return the process-wide singleton [`ResultCache`], located in the
    /// directory named by `BATCH_PROVER_CACHE_DIR`, or `~/.batch-prover/cache`
    /// by default.
    pub fn global() -> &'static ResultCache {
        static INSTANCE: OnceLock<ResultCache> = OnceLock::new();
        INSTANCE.get_or_init(|| ResultCache::new(default_cache_dir()).expect("cache directory must be usable"))
    }

    fn entry_path(&self, fp: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint_hex(fp)))
    }

    pub fn lookup(&self, fp: &Fingerprint) -> Result<Option<TaskResult>, CacheError> {
        let path = self.entry_path(fp);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| CacheError::CacheDirUnusable {
            path: path.clone(),
            source,
        })?;
        let record: CacheRecord =
            serde_json::from_str(&text).map_err(|source| CacheError::Deserialize { path, source })?;
        Ok(Some(record.result))
    }

    /// Store `result` under `fp`. Refuses `SIGNAL_INTERRUPTED` results: they
    /// represent user-initiated cancellation, not the task's own
    /// reproducible output.
    pub fn store(
        &self,
        fp: &Fingerprint,
        result: &TaskResult,
        artifact_paths: Vec<PathBuf>,
    ) -> Result<(), CacheError> {
        if result.status == TaskStatus::SignalInterrupted {
            return Err(CacheError::RefusedInterrupted(result.task_id.clone()));
        }
        let record = CacheRecord {
            result: result.clone(),
            artifact_paths,
        };
        let text = serde_json::to_string(&record).map_err(CacheError::Serialize)?;
        std::fs::write(self.entry_path(fp), text).map_err(|source| CacheError::CacheDirUnusable {
            path: self.dir.clone(),
            source,
        })
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        for entry in std::fs::read_dir(&self.dir).map_err(|source| CacheError::CacheDirUnusable {
            path: self.dir.clone(),
            source,
        })? {
            let entry = entry.map_err(|source| CacheError::CacheDirUnusable {
                path: self.dir.clone(),
                source,
            })?;
            let _ = std::fs::remove_file(entry.path());
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// The default per-user cache directory: `BATCH_PROVER_CACHE_DIR` if set,
/// otherwise `{home}/.batch-prover/cache`. Exposed so the CLI can honor the
/// same default when a caller builds an owned [`ResultCache`] instead of
/// going through [`ResultCache::global`].
pub fn default_cache_dir() -> PathBuf {
    std::env::var("BATCH_PROVER_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_home().join(".batch-prover").join("cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_result(status: TaskStatus) -> TaskResult {
        TaskResult {
            task_id: "t1".to_string(),
            status,
            return_code: Some(0),
            stdout: "ok".to_string(),
            stderr: String::new(),
            start_time_unix_ms: 0,
            end_time_unix_ms: 10,
            duration: Duration::from_millis(10),
            memory_stats: None,
        }
    }

    fn input_for<'a>(theory_file: &'a Path) -> FingerprintInput<'a> {
        FingerprintInput {
            target_identity: "/usr/bin/tamarin-prover",
            theory_file,
            lemma: Some("secrecy"),
            prover_options: &[],
            preprocess_flags: &[],
            max_cores: 4,
            max_memory_gib: 8,
            timeout_seconds: 600,
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        let fp1 = fingerprint(&input_for(&theory)).unwrap();
        let fp2 = fingerprint(&input_for(&theory)).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn fingerprint_changes_when_any_field_changes() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        let base = fingerprint(&input_for(&theory)).unwrap();

        let mut changed = input_for(&theory);
        changed.lemma = Some("other");
        assert_ne!(fingerprint(&changed).unwrap(), base);

        let mut changed = input_for(&theory);
        changed.max_cores = 99;
        assert_ne!(fingerprint(&changed).unwrap(), base);

        std::fs::write(&theory, "theory X begin\nrule R: [] --[]-> []\nend").unwrap();
        assert_ne!(fingerprint(&input_for(&theory)).unwrap(), base);
    }

    #[test]
    fn fingerprint_fails_on_missing_theory_file() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("missing.spthy");
        assert!(fingerprint(&input_for(&theory)).is_err());
    }

    #[test]
    fn store_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        let cache = ResultCache::new(dir.path().join("cache")).unwrap();
        let fp = fingerprint(&input_for(&theory)).unwrap();

        assert!(cache.lookup(&fp).unwrap().is_none());
        let result = sample_result(TaskStatus::Completed);
        cache.store(&fp, &result, vec![]).unwrap();
        let found = cache.lookup(&fp).unwrap().unwrap();
        assert_eq!(found.task_id, result.task_id);
        assert_eq!(found.status, TaskStatus::Completed);
    }

    #[test]
    fn store_refuses_signal_interrupted_results() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        let cache = ResultCache::new(dir.path().join("cache")).unwrap();
        let fp = fingerprint(&input_for(&theory)).unwrap();

        let result = sample_result(TaskStatus::SignalInterrupted);
        let err = cache.store(&fp, &result, vec![]).unwrap_err();
        assert!(matches!(err, CacheError::RefusedInterrupted(_)));
        assert!(cache.lookup(&fp).unwrap().is_none());
    }

    #[test]
    fn clear_empties_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        let cache = ResultCache::new(dir.path().join("cache")).unwrap();
        let fp = fingerprint(&input_for(&theory)).unwrap();
        cache.store(&fp, &sample_result(TaskStatus::Completed), vec![]).unwrap();
        assert_eq!(cache.size(), 1);
        cache.clear().unwrap();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn cache_survives_across_instances_pointed_at_same_directory() {
        let dir = tempfile::tempdir().unwrap();
        let theory = dir.path().join("t.spthy");
        std::fs::write(&theory, "theory X begin end").unwrap();
        let cache_dir = dir.path().join("cache");
        let fp = fingerprint(&input_for(&theory)).unwrap();
        {
            let cache = ResultCache::new(cache_dir.clone()).unwrap();
            cache.store(&fp, &sample_result(TaskStatus::Completed), vec![]).unwrap();
        }
        let reopened = ResultCache::new(cache_dir).unwrap();
        assert!(reopened.lookup(&fp).unwrap().is_some());
    }
}
