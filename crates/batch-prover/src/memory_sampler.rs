//! Memory Sampler (C3): samples a live target's resident memory at a fixed
//! cadence and reports peak/mean in MiB.
//!
//! The sampler never kills anything itself — it only records evidence. The
//! executor (C7) consults the recorded peak against `max_memory_gib` during
//! classification; the container runtime's own kernel cap is the ground
//! truth for containers.

use std::time::Duration;

use crate::task::MemoryStats;

/// Cadence at which RSS is sampled while a target is alive.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Accumulates samples and reduces them to [`MemoryStats`] once the target
/// exits. Missed samples (source temporarily unavailable) are simply
/// skipped rather than recorded as zero.
#[derive(Debug, Default)]
struct Accumulator {
    peak_mib: f64,
    sum_mib: f64,
    count: u64,
}

impl Accumulator {
    fn record(&mut self, mib: f64) {
        self.peak_mib = self.peak_mib.max(mib);
        self.sum_mib += mib;
        self.count += 1;
    }

    fn finish(self) -> Option<MemoryStats> {
        if self.count == 0 {
            return None;
        }
        Some(MemoryStats {
            peak_mib: self.peak_mib,
            mean_mib: self.sum_mib / self.count as f64,
        })
    }
}

/// Samples a native process's RSS by pid, via the host process table, every
/// [`SAMPLE_INTERVAL`] until `still_alive` returns `false`. Call this
/// concurrently with the process wait, then take the returned stats once
/// both futures have resolved.
pub async fn sample_native<F>(pid: u32, mut still_alive: F) -> Option<MemoryStats>
where
    F: FnMut() -> bool,
{
    let mut system = sysinfo::System::new();
    let mut accumulator = Accumulator::default();
    let sysinfo_pid = sysinfo::Pid::from_u32(pid);

    while still_alive() {
        system.refresh_process(sysinfo_pid);
        if let Some(process) = system.process(sysinfo_pid) {
            let mib = process.memory() as f64 / (1024.0 * 1024.0);
            accumulator.record(mib);
        }
        // Missed sample (process not yet registered, or already gone): skip it.
        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }

    accumulator.finish()
}

/// Samples a container's RSS via the container engine's own stats interface
/// (`docker stats --no-stream`), keyed by container id, every
/// [`SAMPLE_INTERVAL`] until `still_alive` returns `false`.
pub async fn sample_container<F>(container_id: &str, mut still_alive: F) -> Option<MemoryStats>
where
    F: FnMut() -> bool,
{
    let mut accumulator = Accumulator::default();

    while still_alive() {
        if let Some(mib) = docker_stats_mem_mib(container_id).await {
            accumulator.record(mib);
        }
        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }

    accumulator.finish()
}

async fn docker_stats_mem_mib(container_id: &str) -> Option<f64> {
    let output = tokio::process::Command::new("docker")
        .args([
            "stats",
            "--no-stream",
            "--format",
            "{{.MemUsage}}",
            container_id,
        ])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    parse_mem_usage(text.trim())
}

/// Parses a `docker stats` `MemUsage` field such as `"512.3MiB / 2GiB"` into
/// the used-side value expressed in MiB.
fn parse_mem_usage(field: &str) -> Option<f64> {
    let used = field.split('/').next()?.trim();
    parse_size_to_mib(used)
}

fn parse_size_to_mib(value: &str) -> Option<f64> {
    let (number_part, unit) = value.split_at(
        value
            .find(|c: char| c.is_alphabetic())
            .unwrap_or(value.len()),
    );
    let number: f64 = number_part.trim().parse().ok()?;
    let mib = match unit.trim().to_ascii_lowercase().as_str() {
        "b" => number / (1024.0 * 1024.0),
        "kib" | "kb" => number / 1024.0,
        "mib" | "mb" => number,
        "gib" | "gb" => number * 1024.0,
        "tib" | "tb" => number * 1024.0 * 1024.0,
        _ => return None,
    };
    Some(mib)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mib_usage() {
        assert_eq!(parse_mem_usage("512.3MiB / 2GiB"), Some(512.3));
    }

    #[test]
    fn parses_gib_usage() {
        assert_eq!(parse_mem_usage("1.5GiB / 4GiB"), Some(1536.0));
    }

    #[test]
    fn rejects_unparseable_usage() {
        assert_eq!(parse_mem_usage("garbage"), None);
    }

    #[tokio::test]
    async fn no_samples_taken_yields_no_stats() {
        let stats = sample_native(1, || false).await;
        assert!(stats.is_none());
    }

    #[test]
    fn accumulator_reports_peak_and_mean() {
        let mut acc = Accumulator::default();
        acc.record(10.0);
        acc.record(30.0);
        acc.record(20.0);
        let stats = acc.finish().unwrap();
        assert_eq!(stats.peak_mib, 30.0);
        assert_eq!(stats.mean_mib, 20.0);
    }
}
