//! Process and system data model.
//!
//! Raw [`ProcessSample`]s come out of a snapshot source, the sample cache turns
//! them into [`ProcessInfo`] records, and one [`Snapshot`] per cycle is handed
//! to consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::protected::OperatingSystem;

/// Operating system process ID.
pub type Pid = u32;

/// A process instance: pid plus the creation token reported by the OS.
///
/// A pid that is reused after its process died carries a different
/// `start_time`, so the two instances never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: Pid,
    pub start_time: u64,
}

/// Scheduling state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    #[default]
    Unknown,
}

impl ProcessStatus {
    /// Maps the state letter of `/proc/<pid>/stat`.
    pub fn from_state_char(state: char) -> Self {
        match state {
            'R' => Self::Running,
            'S' | 'D' | 'I' | 'W' | 'P' => Self::Sleeping,
            'T' | 't' => Self::Stopped,
            'Z' | 'X' | 'x' => Self::Zombie,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Stopped => "stopped",
            Self::Zombie => "zombie",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw reading of a process, as returned by a snapshot source.
#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: Pid,
    /// Opaque creation token, see [`ProcessIdentity`].
    pub start_time: u64,
    pub name: String,
    /// Total CPU seconds (user + system) since the process started.
    pub cpu_time_seconds: f64,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    pub status: ProcessStatus,
    pub user: String,
    pub cmdline: String,
    /// Instant at which this particular process was read.
    pub sampled_at: Instant,
}

impl ProcessSample {
    pub fn identity(&self) -> ProcessIdentity {
        ProcessIdentity {
            pid: self.pid,
            start_time: self.start_time,
        }
    }
}

/// Published per-process record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub name: String,
    /// CPU usage over the last measured interval, `0..=100 * cores`.
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub status: ProcessStatus,
    pub user: String,
}

/// System-wide figures for one sampling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub process_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl SystemStats {
    pub fn new(cpu_percent: f64, ram_percent: f64) -> Self {
        Self {
            cpu_percent,
            ram_percent,
            process_count: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Everything published for one cycle: shared stats plus the ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cycle: u64,
    pub stats: SystemStats,
    pub processes: Vec<ProcessInfo>,
}

impl Snapshot {
    pub fn find(&self, pid: Pid) -> Option<&ProcessInfo> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(|p| p.pid).collect()
    }
}

/// Static host information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: OperatingSystem,
    pub os_version: String,
    /// `None` when the platform does not expose physical cores.
    pub cpu_physical: Option<usize>,
    pub cpu_logical: usize,
    pub ram_total: u64,
    pub ram_available: u64,
    pub boot_time: Option<DateTime<Utc>>,
}
