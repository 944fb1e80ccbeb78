//! One synchronous sampling cycle: read, diff, rank, assemble.
//!
//! [`SamplingEngine`] owns the sample cache and the failure counter. It does
//! no scheduling; [`crate::monitor::Monitor`] drives it on a blocking thread.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cache::{RefreshPolicy, SampleCache};
use crate::error::{EngineError, SourceError};
use crate::process::Snapshot;
use crate::ranking::{rank, SortKey, ViewOptions};
use crate::source::SnapshotSource;
use crate::termination::DEFAULT_GRACE_PERIOD;

/// Resolved engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub interval: Duration,
    /// Records published per snapshot.
    pub display_limit: usize,
    pub top_k: usize,
    pub full_refresh_every: u32,
    pub max_consecutive_failures: u32,
    pub sort_key: SortKey,
    pub filter: Option<String>,
    /// Wait before a graceful termination escalates to a forced kill.
    pub grace_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            display_limit: 100,
            top_k: 50,
            full_refresh_every: 5,
            max_consecutive_failures: 3,
            sort_key: SortKey::Cpu,
            filter: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl EngineConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            top_k: self.top_k,
            full_refresh_every: self.full_refresh_every,
        }
    }

    pub fn initial_view(&self) -> ViewOptions {
        ViewOptions::new(self.sort_key, self.filter.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Sampling,
    Publishing,
    /// Terminal: cancelled or failed.
    Stopped,
}

/// Observable engine status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineStatus {
    pub state: EngineState,
    pub consecutive_failures: u32,
    /// Snapshots published since the last start.
    pub cycles: u64,
    /// Set when the engine stopped because of a fatal error.
    pub fatal: Option<EngineError>,
}

impl EngineStatus {
    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Published(Arc<Snapshot>),
    /// Transient failure; the previous snapshot stays current.
    Skipped {
        consecutive_failures: u32,
        error: SourceError,
    },
    /// Too many consecutive failures; the engine must stop.
    Fatal(EngineError),
}

pub struct SamplingEngine {
    source: Arc<dyn SnapshotSource>,
    cache: SampleCache,
    display_limit: usize,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    cycles: u64,
    last_published: Option<Arc<Snapshot>>,
}

impl SamplingEngine {
    /// Creates an engine with an empty cache.
    pub fn new(source: Arc<dyn SnapshotSource>, config: &EngineConfig) -> Self {
        let cache = SampleCache::new(source.core_count(), config.refresh_policy());
        Self {
            source,
            cache,
            display_limit: config.display_limit,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            consecutive_failures: 0,
            cycles: 0,
            last_published: None,
        }
    }

    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn last_published(&self) -> Option<&Arc<Snapshot>> {
        self.last_published.as_ref()
    }

    /// Runs one cycle. Blocks on source I/O.
    pub fn run_cycle(&mut self, view: &ViewOptions) -> CycleOutcome {
        let samples = match self.source.list_processes() {
            Ok(samples) => samples,
            Err(error) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_consecutive_failures {
                    let fatal = EngineError::SourceFailed {
                        failures: self.consecutive_failures,
                        last: error,
                    };
                    error!("Sampling engine stopping: {}", fatal);
                    return CycleOutcome::Fatal(fatal);
                }
                warn!(
                    "Skipping cycle ({} of {} allowed failures): {}",
                    self.consecutive_failures, self.max_consecutive_failures, error
                );
                return CycleOutcome::Skipped {
                    consecutive_failures: self.consecutive_failures,
                    error,
                };
            }
        };
        self.consecutive_failures = 0;

        let mut stats = self.source.read_system_stats();
        stats.process_count = samples.len();
        let infos = self.cache.merge(samples);
        let processes = rank(infos, view, self.display_limit);

        self.cycles += 1;
        debug!(
            "Cycle {}: {} processes sampled, {} published",
            self.cycles,
            stats.process_count,
            processes.len()
        );
        let snapshot = Arc::new(Snapshot {
            cycle: self.cycles,
            stats,
            processes,
        });
        self.last_published = Some(snapshot.clone());
        CycleOutcome::Published(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ReplayFrame, ReplayProcess, ScriptedSource};

    fn engine_for(frames: Vec<ReplayFrame>, config: &EngineConfig) -> SamplingEngine {
        SamplingEngine::new(Arc::new(ScriptedSource::from_frames(4, frames)), config)
    }

    fn published(outcome: CycleOutcome) -> Arc<Snapshot> {
        match outcome {
            CycleOutcome::Published(s) => s,
            other => panic!("expected a published snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_ranks_and_counts() {
        let frames = vec![
            ReplayFrame::new(0.0, vec![ReplayProcess::new(1, "a", 10.0), ReplayProcess::new(2, "b", 5.0)]),
            ReplayFrame::new(2.0, vec![ReplayProcess::new(1, "a", 12.0), ReplayProcess::new(2, "b", 5.5)]),
        ];
        let mut engine = engine_for(frames, &EngineConfig::default());
        let view = ViewOptions::default();

        let first = published(engine.run_cycle(&view));
        assert_eq!(first.cycle, 1);
        assert!(first.processes.iter().all(|p| p.cpu_percent == 0.0));

        let second = published(engine.run_cycle(&view));
        assert_eq!(second.pids(), vec![1, 2]);
        assert_eq!(second.stats.process_count, 2);
        assert!((second.processes[0].cpu_percent - 100.0).abs() < 1e-9);
        assert!((second.processes[1].cpu_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_limit_caps_output_not_cache() {
        let processes = (1..=10).map(|pid| ReplayProcess::new(pid, "w", 0.0)).collect();
        let config = EngineConfig {
            display_limit: 3,
            ..Default::default()
        };
        let mut engine = engine_for(vec![ReplayFrame::new(0.0, processes)], &config);
        let snapshot = published(engine.run_cycle(&ViewOptions::default()));
        assert_eq!(snapshot.processes.len(), 3);
        assert_eq!(snapshot.stats.process_count, 10);
        assert_eq!(engine.cache().len(), 10);
    }

    #[test]
    fn test_failures_skip_then_become_fatal() {
        let frames = vec![
            ReplayFrame::new(0.0, vec![ReplayProcess::new(1, "a", 0.0)]),
            ReplayFrame::unavailable(1.0),
            ReplayFrame::new(2.0, vec![ReplayProcess::new(1, "a", 1.0)]),
            ReplayFrame::unavailable(3.0),
            ReplayFrame::unavailable(4.0),
        ];
        let config = EngineConfig {
            max_consecutive_failures: 2,
            ..Default::default()
        };
        let mut engine = engine_for(frames, &config);
        let view = ViewOptions::default();

        published(engine.run_cycle(&view));
        assert!(matches!(engine.run_cycle(&view), CycleOutcome::Skipped { consecutive_failures: 1, .. }));
        published(engine.run_cycle(&view));
        assert_eq!(engine.consecutive_failures(), 0);
        assert!(matches!(engine.run_cycle(&view), CycleOutcome::Skipped { .. }));
        match engine.run_cycle(&view) {
            CycleOutcome::Fatal(EngineError::SourceFailed { failures, .. }) => assert_eq!(failures, 2),
            other => panic!("expected fatal outcome, got {other:?}"),
        }
        assert_eq!(engine.last_published().map(|s| s.cycle), Some(2));
    }
}
