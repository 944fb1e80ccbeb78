//! Differential sample cache.
//!
//! Operating systems report cumulative CPU time per process, so a usage
//! percentage needs two readings of the same process instance. The cache keeps
//! the previous reading per [`ProcessIdentity`] and turns each new batch of
//! samples into [`ProcessInfo`] records.
//!
//! Recomputing every delta every cycle is not needed for a ranked view: only
//! the `top_k` busiest identities of the previous cycle get fresh deltas, and
//! every `full_refresh_every` cycles all of them do. An identity that is not
//! refreshed keeps both its last percentage and its old baseline, so its next
//! delta spans the whole stale window.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::time::Instant;
use tracing::debug;

use crate::process::{ProcessIdentity, ProcessInfo, ProcessSample, ProcessStatus};

/// Controls how many deltas are recomputed per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Identities with the highest previous CPU that get a fresh delta each
    /// cycle. `0` disables the optimisation.
    pub top_k: usize,
    /// Every n-th cycle recomputes every identity.
    pub full_refresh_every: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            top_k: 50,
            full_refresh_every: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedEntry {
    last_cpu_seconds: f64,
    last_sampled_at: Instant,
    /// `None` until two readings with a positive interval exist.
    cpu_percent: Option<f64>,
    name: String,
    memory_bytes: u64,
    status: ProcessStatus,
    user: String,
}

impl CachedEntry {
    fn first_sight(sample: ProcessSample) -> Self {
        Self {
            last_cpu_seconds: sample.cpu_time_seconds,
            last_sampled_at: sample.sampled_at,
            cpu_percent: None,
            name: sample.name,
            memory_bytes: sample.memory_bytes,
            status: sample.status,
            user: sample.user,
        }
    }

    fn to_info(&self, pid: u32) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: self.name.clone(),
            cpu_percent: self.cpu_percent.unwrap_or(0.0),
            memory_bytes: self.memory_bytes,
            status: self.status,
            user: self.user.clone(),
        }
    }
}

/// CPU percent between two cumulative readings, clamped to `[0, 100 * cores]`.
///
/// Returns `None` when the interval is not positive.
pub fn cpu_percent_delta(
    prev_seconds: f64,
    prev_at: Instant,
    cur_seconds: f64,
    cur_at: Instant,
    core_count: usize,
) -> Option<f64> {
    let elapsed = cur_at.saturating_duration_since(prev_at).as_secs_f64();
    if elapsed <= 0.0 {
        return None;
    }
    let percent = (cur_seconds - prev_seconds) / elapsed * 100.0;
    if !percent.is_finite() {
        return Some(0.0);
    }
    Some(percent.clamp(0.0, 100.0 * core_count.max(1) as f64))
}

/// Previous-cycle readings keyed by process identity.
#[derive(Debug)]
pub struct SampleCache {
    entries: HashMap<ProcessIdentity, CachedEntry>,
    core_count: usize,
    policy: RefreshPolicy,
    cycles: u64,
}

impl SampleCache {
    pub fn new(core_count: usize, policy: RefreshPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            core_count: core_count.max(1),
            policy,
            cycles: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any instance of `pid` is cached.
    pub fn contains(&self, pid: u32) -> bool {
        self.entries.keys().any(|id| id.pid == pid)
    }

    pub fn contains_identity(&self, identity: &ProcessIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Number of merges performed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn is_full_refresh(&self) -> bool {
        self.policy.top_k == 0
            || self.policy.full_refresh_every <= 1
            || self.cycles % u64::from(self.policy.full_refresh_every) == 0
    }

    /// Identities that get a fresh delta this cycle, besides those that have
    /// no percentage yet.
    fn refresh_set(&self) -> HashSet<ProcessIdentity> {
        let mut ranked: Vec<(ProcessIdentity, f64)> = self
            .entries
            .iter()
            .filter_map(|(id, e)| e.cpu_percent.map(|p| (*id, p)))
            .collect();
        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.pid.cmp(&b.0.pid)));
        ranked
            .into_iter()
            .take(self.policy.top_k)
            .map(|(id, _)| id)
            .collect()
    }

    /// Merges one cycle's samples into the cache and returns a record for
    /// every process in the batch.
    ///
    /// Identities absent from `samples` are evicted. A pid that reappears with
    /// a different start time is a new process and starts at 0 %.
    pub fn merge(&mut self, samples: Vec<ProcessSample>) -> Vec<ProcessInfo> {
        self.cycles += 1;
        let full = self.is_full_refresh();
        let refresh = if full { HashSet::new() } else { self.refresh_set() };

        let mut previous = std::mem::take(&mut self.entries);
        let mut next: HashMap<ProcessIdentity, CachedEntry> = HashMap::with_capacity(samples.len());
        let mut infos = Vec::with_capacity(samples.len());
        let mut refreshed = 0usize;

        for sample in samples {
            let identity = sample.identity();
            if next.contains_key(&identity) {
                debug!("Duplicate sample for pid {} in one batch, ignoring", identity.pid);
                continue;
            }

            let entry = match previous.remove(&identity) {
                Some(mut entry) => {
                    if full || entry.cpu_percent.is_none() || refresh.contains(&identity) {
                        if let Some(pct) = cpu_percent_delta(
                            entry.last_cpu_seconds,
                            entry.last_sampled_at,
                            sample.cpu_time_seconds,
                            sample.sampled_at,
                            self.core_count,
                        ) {
                            entry.cpu_percent = Some(pct);
                            entry.last_cpu_seconds = sample.cpu_time_seconds;
                            entry.last_sampled_at = sample.sampled_at;
                            refreshed += 1;
                        }
                    }
                    entry.name = sample.name;
                    entry.memory_bytes = sample.memory_bytes;
                    entry.status = sample.status;
                    entry.user = sample.user;
                    entry
                }
                None => CachedEntry::first_sight(sample),
            };

            infos.push(entry.to_info(identity.pid));
            next.insert(identity, entry);
        }

        if !previous.is_empty() {
            debug!("Evicted {} exited processes from sample cache", previous.len());
        }
        debug!(
            "Cache merge cycle {}: {} entries, {} deltas refreshed (full={})",
            self.cycles,
            next.len(),
            refreshed,
            full
        );

        self.entries = next;
        infos
    }
}
