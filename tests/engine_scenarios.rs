//! End-to-end sampling scenarios driven through scripted and instrumented sources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use herakles_proc_sampler::engine::{CycleOutcome, SamplingEngine};
use herakles_proc_sampler::process::{ProcessSample, SystemInfo};
use herakles_proc_sampler::ranking::ViewOptions;
use herakles_proc_sampler::source::{ReplayFrame, ReplayProcess, ReplayScript, ResolvedProcess, ScriptedSource};
use herakles_proc_sampler::{
    EngineConfig, EngineState, Monitor, OperatingSystem, Pid, ProcessStatus, SnapshotSource, SourceError,
    SystemStats, TerminateError, TerminationMode, TerminationOutcome,
};

fn fast_config() -> EngineConfig {
    EngineConfig {
        interval: Duration::from_millis(5),
        ..Default::default()
    }
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn cpu_percentages_follow_cumulative_deltas() {
    let source = Arc::new(ScriptedSource::from_frames(
        1,
        vec![
            ReplayFrame::new(
                0.0,
                vec![ReplayProcess::new(1, "busy", 10.0), ReplayProcess::new(2, "light", 5.0)],
            ),
            ReplayFrame::new(
                2.0,
                vec![ReplayProcess::new(1, "busy", 12.0), ReplayProcess::new(2, "light", 5.5)],
            ),
        ],
    ));
    let monitor = Monitor::new(source, fast_config());
    monitor.start(Duration::from_millis(5));
    wait_until("two snapshots", || monitor.published_count() >= 2).await;
    monitor.stop().await;

    let snapshot = monitor.latest_snapshot().unwrap();
    assert_eq!(snapshot.cycle, 2);
    assert_eq!(snapshot.pids(), vec![1, 2]);
    assert!((snapshot.processes[0].cpu_percent - 100.0).abs() < 0.01);
    assert!((snapshot.processes[1].cpu_percent - 25.0).abs() < 0.01);
}

#[test]
fn exited_process_is_dropped_from_snapshot_and_cache() {
    let source = Arc::new(ScriptedSource::from_frames(
        2,
        vec![
            ReplayFrame::new(
                0.0,
                vec![
                    ReplayProcess::new(1, "a", 1.0),
                    ReplayProcess::new(2, "b", 1.0),
                    ReplayProcess::new(3, "c", 1.0),
                ],
            ),
            ReplayFrame::new(
                1.0,
                vec![ReplayProcess::new(1, "a", 1.5), ReplayProcess::new(2, "b", 1.2)],
            ),
        ],
    ));
    let mut engine = SamplingEngine::new(source, &EngineConfig::default());
    let view = ViewOptions::default();

    let CycleOutcome::Published(first) = engine.run_cycle(&view) else {
        panic!("first cycle should publish");
    };
    assert!(first.find(3).is_some());
    assert!(engine.cache().contains(3));

    let CycleOutcome::Published(second) = engine.run_cycle(&view) else {
        panic!("second cycle should publish");
    };
    assert!(second.find(3).is_none());
    assert!(!engine.cache().contains(3));
    assert_eq!(engine.cache().len(), 2);
}

#[tokio::test]
async fn repeated_failures_stop_the_engine_but_keep_the_last_snapshot() {
    let source = Arc::new(ScriptedSource::from_frames(
        1,
        vec![
            ReplayFrame::new(0.0, vec![ReplayProcess::new(7, "survivor", 0.0)]),
            ReplayFrame::unavailable(1.0),
            ReplayFrame::unavailable(2.0),
            ReplayFrame::unavailable(3.0),
        ],
    ));
    let config = EngineConfig {
        max_consecutive_failures: 3,
        ..fast_config()
    };
    let monitor = Monitor::new(source.clone(), config);
    monitor.start(Duration::from_millis(5));

    wait_until("fatal stop", || monitor.status().is_fatal()).await;
    wait_until("loop exit", || !monitor.is_running()).await;

    let status = monitor.status();
    assert_eq!(status.state, EngineState::Stopped);
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(source.list_calls(), 4);

    let last = monitor.latest_snapshot().unwrap();
    assert_eq!(last.cycle, 1);
    assert_eq!(last.pids(), vec![7]);
    assert_eq!(monitor.published_count(), 1);
}

#[tokio::test]
async fn transient_failure_is_skipped() {
    let mut script = ReplayScript::new(
        1,
        vec![
            ReplayFrame::new(0.0, vec![ReplayProcess::new(1, "a", 0.0)]),
            ReplayFrame::unavailable(1.0),
            ReplayFrame::new(2.0, vec![ReplayProcess::new(1, "a", 1.0)]),
        ],
    );
    script.repeat = true;
    let monitor = Monitor::new(Arc::new(ScriptedSource::new(script)), fast_config());
    monitor.start(Duration::from_millis(5));
    wait_until("three snapshots", || monitor.published_count() >= 3).await;
    monitor.stop().await;

    let status = monitor.status();
    assert!(!status.is_fatal());
    assert!(monitor.cycle_stats().failed_cycles >= 1);
}

/// Slow source that records overlapping `list_processes` calls and when
/// each call began.
struct SlowCountingSource {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    started: Mutex<Vec<Instant>>,
}

impl SlowCountingSource {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    fn call_starts(&self) -> Vec<Instant> {
        self.started.lock().unwrap().clone()
    }
}

impl SnapshotSource for SlowCountingSource {
    fn list_processes(&self) -> Result<Vec<ProcessSample>, SourceError> {
        self.started.lock().unwrap().push(Instant::now());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![ProcessSample {
            pid: 1,
            start_time: 1,
            name: "slow".into(),
            cpu_time_seconds: 0.0,
            memory_bytes: 0,
            status: ProcessStatus::Running,
            user: String::new(),
            cmdline: String::new(),
            sampled_at: Instant::now(),
        }])
    }

    fn read_system_stats(&self) -> SystemStats {
        SystemStats::new(0.0, 0.0)
    }

    fn resolve(&self, pid: Pid) -> Result<ResolvedProcess, TerminateError> {
        Err(TerminateError::NotFound(pid))
    }

    fn terminate(&self, pid: Pid, _mode: TerminationMode) -> Result<(), TerminateError> {
        Err(TerminateError::NotFound(pid))
    }

    fn core_count(&self) -> usize {
        1
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            os: OperatingSystem::Other,
            os_version: "slow".into(),
            cpu_physical: None,
            cpu_logical: 1,
            ram_total: 0,
            ram_available: 0,
            boot_time: None,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_start_does_not_spawn_another_loop() {
    let source = Arc::new(SlowCountingSource::new(Duration::from_millis(20)));
    let monitor = Monitor::new(source.clone(), fast_config());

    assert!(monitor.start(Duration::ZERO));
    assert!(!monitor.start(Duration::ZERO));
    assert!(!monitor.start(Duration::ZERO));

    wait_until("several cycles", || source.calls.load(Ordering::SeqCst) >= 5).await;
    monitor.stop().await;

    assert_eq!(source.peak.load(Ordering::SeqCst), 1);
    let snapshot = monitor.latest_snapshot().unwrap();
    assert_eq!(snapshot.cycle, monitor.published_count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cycles_slower_than_the_interval_run_back_to_back() {
    let delay = Duration::from_millis(30);
    let source = Arc::new(SlowCountingSource::new(delay));
    let monitor = Monitor::new(source.clone(), fast_config());

    let began = Instant::now();
    assert!(monitor.start(Duration::from_millis(5)));
    wait_until("four slow cycles", || source.calls.load(Ordering::SeqCst) >= 4).await;
    monitor.stop().await;
    let elapsed = began.elapsed();

    assert_eq!(source.peak.load(Ordering::SeqCst), 1);

    // Each cycle starts only after the previous one finished, with no
    // catch-up burst for the intervals it overran.
    let starts = source.call_starts();
    for pair in starts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= delay, "{:?}", pair[1].duration_since(pair[0]));
    }
    let calls = source.calls.load(Ordering::SeqCst) as u128;
    assert!(calls <= elapsed.as_millis() / delay.as_millis() + 1, "{calls} calls in {elapsed:?}");

    // Nothing queued up behind the stop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst) as u128, calls);
    assert_eq!(monitor.published_count() as usize, starts.len());
}

#[tokio::test]
async fn protected_process_is_never_signalled() {
    let source = Arc::new(ScriptedSource::from_frames(
        1,
        vec![ReplayFrame::new(
            0.0,
            vec![
                ReplayProcess::new(1, "systemd", 0.0),
                ReplayProcess::new(90, "kworker/0:1-events", 0.0),
                ReplayProcess::new(4000, "runaway", 0.0),
            ],
        )],
    ));
    let monitor = Monitor::with_os(source.clone(), OperatingSystem::Linux, fast_config());

    for pid in [1, 90] {
        let outcome = monitor.request_termination_with(pid, TerminationMode::Force).await;
        assert!(matches!(outcome, TerminationOutcome::Denied { .. }), "{outcome:?}");
    }
    assert!(source.terminate_calls().is_empty());

    let outcome = monitor.request_termination_with(4000, TerminationMode::Force).await;
    assert!(outcome.is_terminated());
    assert_eq!(source.terminate_calls(), vec![(4000, TerminationMode::Force)]);

    let again = monitor.request_termination_with(4000, TerminationMode::Force).await;
    assert_eq!(
        again,
        TerminationOutcome::Failed {
            pid: 4000,
            cause: TerminateError::NotFound(4000)
        }
    );
}

#[tokio::test]
async fn access_denied_is_reported_not_fatal() {
    let mut script = ReplayScript::new(1, vec![ReplayFrame::new(0.0, vec![ReplayProcess::new(500, "rootd", 0.0)])]);
    script.permission_denied = vec![500];
    let monitor = Monitor::with_os(Arc::new(ScriptedSource::new(script)), OperatingSystem::Linux, fast_config());

    let outcome = monitor.request_termination_with(500, TerminationMode::Graceful).await;
    assert_eq!(
        outcome,
        TerminationOutcome::Failed {
            pid: 500,
            cause: TerminateError::PermissionDenied(500)
        }
    );
    assert!(!monitor.status().is_fatal());
}
