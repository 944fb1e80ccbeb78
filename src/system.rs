//! System-wide figures from the /proc filesystem.
//!
//! Parsers take file contents so they can be tested without a live /proc;
//! the `read_*` wrappers take the procfs root (normally `/proc`).

use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Total and available memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedMemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl ExtendedMemoryInfo {
    /// Share of memory in use, `0.0..=100.0`.
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// CPU time counters of one `cpu` line in /proc/stat, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Calculate total CPU time (all fields).
    pub fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.iowait + self.irq + self.softirq + self.steal
    }

    /// Non-active time: true idle plus time waiting for I/O.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

fn meminfo_kb(line: &str) -> Option<u64> {
    line.split_whitespace().nth(1)?.parse::<u64>().ok()
}

/// Parses MemTotal and MemAvailable out of /proc/meminfo content.
///
/// Kernels older than 3.14 have no MemAvailable; MemFree + Buffers + Cached
/// is used instead.
pub fn parse_extended_memory_info(content: &str) -> Result<ExtendedMemoryInfo, String> {
    let mut total: Option<u64> = None;
    let mut available: Option<u64> = None;
    let mut fallback = 0u64;

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            total = meminfo_kb(line);
        } else if line.starts_with("MemAvailable:") {
            available = meminfo_kb(line);
        } else if line.starts_with("MemFree:") || line.starts_with("Buffers:") || line.starts_with("Cached:") {
            fallback += meminfo_kb(line).unwrap_or(0);
        }
    }

    match total {
        Some(total) => Ok(ExtendedMemoryInfo {
            total_bytes: total * 1024,
            available_bytes: available.unwrap_or(fallback).min(total) * 1024,
        }),
        None => Err("Failed to parse MemTotal from /proc/meminfo".to_string()),
    }
}

/// Parses the aggregate `cpu` line of /proc/stat.
pub fn parse_cpu_stats(content: &str) -> Result<CpuStat, String> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| "No aggregate cpu line found in /proc/stat".to_string())?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>().unwrap_or(0))
        .collect();
    if fields.len() < 7 {
        return Err(format!(
            "Invalid cpu line in /proc/stat: expected at least 7 counters, got {}",
            fields.len()
        ));
    }

    Ok(CpuStat {
        user: fields[0],
        nice: fields[1],
        system: fields[2],
        idle: fields[3],
        iowait: fields[4],
        irq: fields[5],
        softirq: fields[6],
        steal: fields.get(7).copied().unwrap_or(0),
    })
}

/// Boot time (`btime`, seconds since the epoch) from /proc/stat.
pub fn parse_boot_time(content: &str) -> Option<i64> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
}

/// Counts logical processors in /proc/cpuinfo.
pub fn parse_cpu_count(content: &str) -> usize {
    content
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count()
}

/// Counts distinct (physical id, core id) pairs in /proc/cpuinfo.
///
/// Returns `None` when the kernel does not report core topology (some ARM
/// boards, most containers with a masked cpuinfo).
pub fn parse_physical_core_count(content: &str) -> Option<usize> {
    let mut cores = ahash::AHashSet::new();
    let mut physical_id = None;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            physical_id = None;
            continue;
        };
        match key.trim() {
            "physical id" => physical_id = Some(value.trim().to_string()),
            "core id" => {
                let socket = physical_id.clone().unwrap_or_default();
                cores.insert((socket, value.trim().to_string()));
            }
            _ => {}
        }
    }
    (!cores.is_empty()).then_some(cores.len())
}

fn read(root: &Path, name: &str) -> Result<String, String> {
    let path = root.join(name);
    fs::read_to_string(&path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

pub fn read_extended_memory_info(root: &Path) -> Result<ExtendedMemoryInfo, String> {
    parse_extended_memory_info(&read(root, "meminfo")?)
}

pub fn read_cpu_stats(root: &Path) -> Result<CpuStat, String> {
    parse_cpu_stats(&read(root, "stat")?)
}

pub fn read_boot_time(root: &Path) -> Option<i64> {
    read(root, "stat").ok().as_deref().and_then(parse_boot_time)
}

/// Logical and physical core counts from cpuinfo.
pub fn read_core_counts(root: &Path) -> Result<(usize, Option<usize>), String> {
    let content = read(root, "cpuinfo")?;
    let logical = parse_cpu_count(&content);
    if logical == 0 {
        return Err("No processors found in cpuinfo".to_string());
    }
    Ok((logical, parse_physical_core_count(&content)))
}

/// Remembers the previous aggregate counters so consecutive reads yield an
/// overall CPU usage percentage.
#[derive(Debug, Default)]
pub struct CpuStatsCache {
    previous: Mutex<Option<CpuStat>>,
}

impl CpuStatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `current` and returns the busy share since the previous call,
    /// `0.0..=100.0`. The first call has no baseline and returns 0.
    pub fn usage_percent(&self, current: CpuStat) -> f64 {
        let mut guard = self.previous.lock().unwrap_or_else(|p| p.into_inner());
        let percent = match guard.as_ref() {
            Some(previous) => {
                let delta_total = current.total().saturating_sub(previous.total());
                let delta_idle = current.idle_total().saturating_sub(previous.idle_total());
                if delta_total > 0 {
                    delta_total.saturating_sub(delta_idle) as f64 / delta_total as f64 * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *guard = Some(current);
        percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\nMemAvailable:    4096000 kB\nBuffers:          512000 kB\nCached:          2048000 kB\nSwapTotal:       4096000 kB\n";

    #[test]
    fn test_parse_extended_memory_info() {
        let mem = parse_extended_memory_info(MEMINFO).unwrap();
        assert_eq!(mem.total_bytes, 16384000 * 1024);
        assert_eq!(mem.available_bytes, 4096000 * 1024);
        assert!((mem.used_percent() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_memory_without_mem_available() {
        let content = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 100 kB\n";
        let mem = parse_extended_memory_info(content).unwrap();
        assert_eq!(mem.available_bytes, 250 * 1024);
    }

    #[test]
    fn test_parse_memory_info_missing_total() {
        assert!(parse_extended_memory_info("MemFree: 8192000 kB\n").is_err());
    }

    #[test]
    fn test_parse_cpu_stats() {
        let stat = "cpu  100 5 50 800 20 3 2 1 0 0\ncpu0 50 2 25 400 10 1 1 0 0 0\nbtime 1700000000\n";
        let cpu = parse_cpu_stats(stat).unwrap();
        assert_eq!(cpu.user, 100);
        assert_eq!(cpu.steal, 1);
        assert_eq!(cpu.total(), 981);
        assert_eq!(cpu.idle_total(), 820);
        assert_eq!(parse_boot_time(stat), Some(1_700_000_000));
    }

    #[test]
    fn test_parse_cpu_stats_rejects_short_line() {
        assert!(parse_cpu_stats("cpu 1 2 3\n").is_err());
        assert!(parse_cpu_stats("intr 1 2 3\n").is_err());
    }

    #[test]
    fn test_parse_cpu_count() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: GenuineIntel\nprocessor\t: 1\nvendor_id\t: GenuineIntel\n";
        assert_eq!(parse_cpu_count(cpuinfo), 2);
    }

    #[test]
    fn test_parse_physical_core_count() {
        let cpuinfo = "processor\t: 0\nphysical id\t: 0\ncore id\t\t: 0\n\n\
                       processor\t: 1\nphysical id\t: 0\ncore id\t\t: 0\n\n\
                       processor\t: 2\nphysical id\t: 0\ncore id\t\t: 1\n\n\
                       processor\t: 3\nphysical id\t: 0\ncore id\t\t: 1\n";
        assert_eq!(parse_physical_core_count(cpuinfo), Some(2));
        assert_eq!(parse_physical_core_count("processor\t: 0\n"), None);
    }

    #[test]
    fn test_cpu_stats_cache_usage() {
        let cache = CpuStatsCache::new();
        let first = CpuStat { user: 100, idle: 900, ..Default::default() };
        assert_eq!(cache.usage_percent(first), 0.0);

        let second = CpuStat { user: 150, idle: 950, ..Default::default() };
        assert!((cache.usage_percent(second) - 50.0).abs() < 1e-9);

        // Unchanged counters produce 0 rather than NaN
        assert_eq!(cache.usage_percent(second), 0.0);
    }

    #[test]
    fn test_readers_use_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        fs::write(dir.path().join("cpuinfo"), "processor\t: 0\nprocessor\t: 1\n").unwrap();
        fs::write(dir.path().join("stat"), "cpu 1 1 1 1 1 1 1 1\nbtime 42\n").unwrap();

        assert_eq!(read_extended_memory_info(dir.path()).unwrap().total_bytes, 16384000 * 1024);
        assert_eq!(read_core_counts(dir.path()).unwrap(), (2, None));
        assert_eq!(read_cpu_stats(dir.path()).unwrap().total(), 8);
        assert_eq!(read_boot_time(dir.path()), Some(42));
    }
}
