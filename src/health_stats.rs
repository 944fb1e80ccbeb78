//! Rolling cycle timing statistics.

use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Number of most recent cycles the rolling figures cover.
pub const WINDOW: usize = 30;

/// Current, average, max and min over the last [`WINDOW`] samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSummary {
    pub current: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub samples: usize,
}

#[derive(Debug, Default)]
struct RollingStat {
    values: VecDeque<f64>,
}

impl RollingStat {
    fn add(&mut self, value: f64) {
        if self.values.len() == WINDOW {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    fn summary(&self) -> StatSummary {
        let Some(&current) = self.values.back() else {
            return StatSummary::default();
        };
        let (min, max, sum) = self
            .values
            .iter()
            .fold((f64::MAX, f64::MIN, 0.0), |(min, max, sum), &v| (min.min(v), max.max(v), sum + v));
        StatSummary {
            current,
            average: sum / self.values.len() as f64,
            max,
            min,
            samples: self.values.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Stat {
    inner: Mutex<RollingStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).add(value);
    }

    fn summary(&self) -> StatSummary {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).summary()
    }
}

/// Point-in-time copy of [`CycleStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CycleStatsSnapshot {
    /// Seconds per successful cycle.
    pub cycle_duration: StatSummary,
    pub scanned_processes: StatSummary,
    pub total_cycles: u64,
    pub failed_cycles: u64,
}

impl CycleStatsSnapshot {
    pub fn render_table(&self) -> String {
        let left_col = 22usize;
        let col_w = 10usize;
        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let d = &self.cycle_duration;
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "cycle duration (ms)",
            format!("{:.1}", d.current * 1000.0),
            format!("{:.1}", d.average * 1000.0),
            format!("{:.1}", d.max * 1000.0),
            format!("{:.1}", d.min * 1000.0),
            left = left_col,
            col = col_w
        )
        .ok();

        let s = &self.scanned_processes;
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "scanned processes",
            format!("{:.0}", s.current),
            format!("{:.1}", s.average),
            format!("{:.0}", s.max),
            format!("{:.0}", s.min),
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(
            out,
            "cycles: {} total, {} failed (last {} shown above)",
            self.total_cycles, self.failed_cycles, d.samples
        )
        .ok();
        out
    }
}

/// Timing of the sampling loop, shared between the loop and consumers.
#[derive(Debug, Default)]
pub struct CycleStats {
    cycle_duration: Stat,
    scanned_processes: Stat,
    total_cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl CycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, duration: Duration, scanned: usize) {
        self.cycle_duration.add_sample(duration.as_secs_f64());
        self.scanned_processes.add_sample(scanned as f64);
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_cycles.fetch_add(1, Ordering::Relaxed);
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CycleStatsSnapshot {
        CycleStatsSnapshot {
            cycle_duration: self.cycle_duration.summary(),
            scanned_processes: self.scanned_processes.summary(),
            total_cycles: self.total_cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = CycleStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.total_cycles, 0);
        assert_eq!(snap.cycle_duration.samples, 0);
        assert_eq!(snap.cycle_duration.average, 0.0);
    }

    #[test]
    fn test_rolling_window_drops_old_samples() {
        let stats = CycleStats::new();
        stats.record_cycle(Duration::from_secs(100), 1);
        for _ in 0..WINDOW {
            stats.record_cycle(Duration::from_millis(10), 50);
        }
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.total_cycles, WINDOW as u64 + 2);
        assert_eq!(snap.failed_cycles, 1);
        assert_eq!(snap.cycle_duration.samples, WINDOW);
        assert!((snap.cycle_duration.max - 0.01).abs() < 1e-9);
        assert_eq!(snap.scanned_processes.min, 50.0);
    }

    #[test]
    fn test_summary_values() {
        let stats = CycleStats::new();
        stats.record_cycle(Duration::from_millis(10), 10);
        stats.record_cycle(Duration::from_millis(30), 30);
        let s = stats.snapshot().scanned_processes;
        assert_eq!(s.current, 30.0);
        assert_eq!(s.average, 20.0);
        assert_eq!(s.max, 30.0);
        assert_eq!(s.min, 10.0);
    }

    #[test]
    fn test_render_table_contains_rows() {
        let stats = CycleStats::new();
        stats.record_cycle(Duration::from_millis(12), 321);
        let table = stats.snapshot().render_table();
        assert!(table.contains("cycle duration (ms)"));
        assert!(table.contains("scanned processes"));
        assert!(table.contains("321"));
        assert!(table.contains("cycles: 1 total, 0 failed"));
    }
}
