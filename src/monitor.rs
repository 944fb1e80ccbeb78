//! Background sampling loop and its public handle.
//!
//! The loop runs as a tokio task and hands each cycle to
//! `spawn_blocking`, so callers of [`Monitor`] never wait on OS I/O.
//! Snapshots reach consumers only through the [`Mailbox`].

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::Mailbox;
use crate::engine::{CycleOutcome, EngineConfig, EngineState, EngineStatus, SamplingEngine};
use crate::error::{EngineError, TerminateError};
use crate::health_stats::{CycleStats, CycleStatsSnapshot};
use crate::process::{Pid, Snapshot};
use crate::protected::OperatingSystem;
use crate::ranking::{normalize_filter, SortKey, ViewOptions};
use crate::source::{self, SnapshotSource};
use crate::termination::{terminate_guarded, TerminationMode, TerminationOutcome};

struct Runner {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Everything the loop task shares with the handle.
#[derive(Clone)]
struct Shared {
    view: Arc<RwLock<ViewOptions>>,
    mailbox: Arc<Mailbox<Arc<Snapshot>>>,
    status: Arc<watch::Sender<EngineStatus>>,
    stats: Arc<CycleStats>,
}

/// Handle to a sampling engine.
pub struct Monitor {
    source: Arc<dyn SnapshotSource>,
    os: OperatingSystem,
    config: EngineConfig,
    shared: Shared,
    runner: Mutex<Option<Runner>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Monitor {
    /// Monitor for `source`, guarding terminations with the protected set
    /// of the running OS.
    pub fn new(source: Arc<dyn SnapshotSource>, config: EngineConfig) -> Self {
        Self::with_os(source, OperatingSystem::current(), config)
    }

    /// Monitor backed by the native source of the running OS.
    pub fn for_current_os(config: EngineConfig) -> Self {
        let os = OperatingSystem::current();
        Self::with_os(Arc::from(source::for_os(os)), os, config)
    }

    pub fn with_os(source: Arc<dyn SnapshotSource>, os: OperatingSystem, config: EngineConfig) -> Self {
        let (status, _) = watch::channel(EngineStatus::default());
        let shared = Shared {
            view: Arc::new(RwLock::new(config.initial_view())),
            mailbox: Arc::new(Mailbox::new()),
            status: Arc::new(status),
            stats: Arc::new(CycleStats::new()),
        };
        Self {
            source,
            os,
            config,
            shared,
            runner: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &Arc<dyn SnapshotSource> {
        &self.source
    }

    pub fn os(&self) -> OperatingSystem {
        self.os
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts sampling every `interval`. Must be called inside a tokio
    /// runtime.
    ///
    /// Returns `false` without doing anything if the loop is already
    /// running. A restart begins with an empty cache.
    pub fn start(&self, interval: Duration) -> bool {
        let mut runner = lock(&self.runner);
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Sampling loop already running, ignoring start");
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Monitor::start called outside of a tokio runtime");
            return false;
        };

        let engine = SamplingEngine::new(self.source.clone(), &self.config);
        let (stop_tx, stop_rx) = watch::channel(false);
        self.shared.status.send_replace(EngineStatus::default());

        info!("Starting sampling loop every {:?}", interval);
        let handle = runtime.spawn(sampling_loop(engine, self.shared.clone(), interval, stop_rx));
        *runner = Some(Runner { stop_tx, handle });
        true
    }

    /// Stops the loop and waits for it to finish. No-op when not running.
    pub async fn stop(&self) {
        let Some(runner) = lock(&self.runner).take() else {
            return;
        };
        runner.stop_tx.send_replace(true);
        if let Err(e) = runner.handle.await {
            warn!("Sampling task ended abnormally: {}", e);
        }
        self.shared.status.send_modify(|s| s.state = EngineState::Stopped);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.runner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Last published snapshot, whether or not it was taken already.
    pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.mailbox.latest()
    }

    /// Snapshot published since the previous take, if any.
    pub fn try_take_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.mailbox.try_take()
    }

    pub fn published_count(&self) -> u64 {
        self.shared.mailbox.published_count()
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.shared.status.subscribe()
    }

    pub fn cycle_stats(&self) -> CycleStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn view(&self) -> ViewOptions {
        self.shared
            .view
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Takes effect on the next published snapshot.
    pub fn set_sort_key(&self, key: SortKey) {
        self.shared
            .view
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .sort_key = key;
    }

    /// Takes effect on the next published snapshot. `None` or a blank
    /// string clears the filter.
    pub fn set_filter(&self, filter: Option<String>) {
        self.shared
            .view
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .filter = normalize_filter(filter);
    }

    /// Graceful termination with the configured grace period.
    pub async fn request_termination(&self, pid: Pid) -> TerminationOutcome {
        self.request_termination_with(pid, TerminationMode::Graceful).await
    }

    pub async fn request_termination_with(&self, pid: Pid, mode: TerminationMode) -> TerminationOutcome {
        let source = self.source.clone();
        let os = self.os;
        let grace = self.config.grace_period;
        tokio::task::spawn_blocking(move || terminate_guarded(source.as_ref(), os, pid, mode, grace))
            .await
            .unwrap_or_else(|e| TerminationOutcome::Failed {
                pid,
                cause: TerminateError::Os {
                    pid,
                    message: format!("termination task failed: {e}"),
                },
            })
    }
}

async fn sampling_loop(
    mut engine: SamplingEngine,
    shared: Shared,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }

        let started = Instant::now();
        shared.status.send_modify(|s| s.state = EngineState::Sampling);
        let view = shared
            .view
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let joined = tokio::task::spawn_blocking(move || {
            let outcome = engine.run_cycle(&view);
            (engine, outcome)
        })
        .await;
        let outcome = match joined {
            Ok((returned, outcome)) => {
                engine = returned;
                outcome
            }
            Err(e) => {
                let fatal = EngineError::TaskAborted(e.to_string());
                error!("Sampling loop stopping: {}", fatal);
                shared.stats.record_failure();
                shared.status.send_modify(|s| {
                    s.state = EngineState::Stopped;
                    s.fatal = Some(fatal);
                });
                return;
            }
        };

        match outcome {
            CycleOutcome::Published(snapshot) => {
                shared.status.send_modify(|s| s.state = EngineState::Publishing);
                let scanned = snapshot.stats.process_count;
                let cycles = snapshot.cycle;
                shared.mailbox.publish(snapshot);
                shared.stats.record_cycle(started.elapsed(), scanned);
                shared.status.send_modify(|s| {
                    s.state = EngineState::Idle;
                    s.consecutive_failures = 0;
                    s.cycles = cycles;
                });
            }
            CycleOutcome::Skipped {
                consecutive_failures, ..
            } => {
                shared.stats.record_failure();
                shared.status.send_modify(|s| {
                    s.state = EngineState::Idle;
                    s.consecutive_failures = consecutive_failures;
                });
            }
            CycleOutcome::Fatal(fatal) => {
                shared.stats.record_failure();
                shared.status.send_modify(|s| {
                    s.state = EngineState::Stopped;
                    s.consecutive_failures = match &fatal {
                        EngineError::SourceFailed { failures, .. } => *failures,
                        EngineError::TaskAborted(_) => s.consecutive_failures,
                    };
                    s.fatal = Some(fatal);
                });
                return;
            }
        }

        let pause = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    shared.status.send_modify(|s| s.state = EngineState::Stopped);
    info!("Sampling loop stopped");
}
