//! Sorting, filtering and capping of the published process list.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::process::ProcessInfo;

/// Ranking key. Every key falls back to pid ascending on ties, so the
/// order is total and the same input always ranks the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// CPU percent, highest first.
    #[default]
    Cpu,
    /// Resident memory, largest first.
    Memory,
    /// Pid, ascending.
    Pid,
    /// Name, case-insensitive ascending.
    Name,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Pid => "pid",
            Self::Name => "name",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "memory" | "mem" => Ok(Self::Memory),
            "pid" => Ok(Self::Pid),
            "name" => Ok(Self::Name),
            other => Err(format!(
                "unknown sort key '{other}', expected cpu, memory, pid or name"
            )),
        }
    }
}

/// Consumer-controlled view settings, applied to the next published ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    pub sort_key: SortKey,
    /// Case-insensitive substring matched against the process name.
    pub filter: Option<String>,
}

impl ViewOptions {
    pub fn new(sort_key: SortKey, filter: Option<String>) -> Self {
        Self {
            sort_key,
            filter: normalize_filter(filter),
        }
    }
}

/// Empty or whitespace-only filters mean "no filter". Any other filter is
/// kept as given, surrounding spaces included.
pub fn normalize_filter(filter: Option<String>) -> Option<String> {
    filter.filter(|f| !f.trim().is_empty())
}

fn cmp_name_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Total order for `key` with pid ascending as the tiebreaker.
pub fn compare(a: &ProcessInfo, b: &ProcessInfo, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Cpu => b.cpu_percent.total_cmp(&a.cpu_percent),
        SortKey::Memory => b.memory_bytes.cmp(&a.memory_bytes),
        SortKey::Pid => Ordering::Equal,
        SortKey::Name => cmp_name_ignore_case(&a.name, &b.name),
    };
    primary.then_with(|| a.pid.cmp(&b.pid))
}

/// Applies the view's filter, orders by its sort key and keeps the first
/// `limit` records.
pub fn rank(mut processes: Vec<ProcessInfo>, view: &ViewOptions, limit: usize) -> Vec<ProcessInfo> {
    if let Some(needle) = view.filter.as_deref() {
        let needle = needle.to_lowercase();
        processes.retain(|p| p.name.to_lowercase().contains(&needle));
    }

    if limit == 0 {
        return Vec::new();
    }

    let key = view.sort_key;
    if processes.len() > limit {
        processes.select_nth_unstable_by(limit, |a, b| compare(a, b, key));
        processes.truncate(limit);
    }
    processes.sort_unstable_by(|a, b| compare(a, b, key));
    processes
}
