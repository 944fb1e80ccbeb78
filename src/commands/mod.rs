//! CLI command implementations for herakles-proc-sampler.
//!
//! - `watch`: live table of the busiest processes
//! - `snapshot`: one-shot sampling with structured output
//! - `kill`: guarded termination
//! - `protected`: protected-name listing
//! - `info`: static system information
//! - `check`: configuration and source validation
//! - `config`: configuration file generation
//! - `generate`: replay script generation

pub mod check;
pub mod config;
pub mod generate;
pub mod info;
pub mod kill;
pub mod protected;
pub mod snapshot;
pub mod watch;

pub use check::command_check;
pub use config::command_config;
pub use generate::command_generate_replay;
pub use info::command_info;
pub use kill::command_kill;
pub use protected::command_protected;
pub use snapshot::command_snapshot;
pub use watch::command_watch;

use anyhow::Context;
use std::fmt::Write as FmtWrite;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use herakles_proc_sampler::format::format_bytes;
use herakles_proc_sampler::source::{self, ScriptedSource};
use herakles_proc_sampler::{OperatingSystem, Snapshot, SnapshotSource};

/// Replay source when a script is given, otherwise the native source.
pub fn open_source(replay: Option<&Path>) -> anyhow::Result<Arc<dyn SnapshotSource>> {
    match replay {
        Some(path) => {
            let scripted = ScriptedSource::from_path(path)
                .with_context(|| format!("Failed to load replay script {}", path.display()))?;
            debug!("Using replay source from {}", path.display());
            Ok(Arc::new(scripted))
        }
        None => Ok(Arc::from(source::for_os(OperatingSystem::current()))),
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Renders a snapshot as a fixed-width table.
pub fn render_snapshot_table(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let stats = &snapshot.stats;

    writeln!(
        out,
        "cycle {} | {} | CPU {:5.1}% | RAM {:5.1}% | {} processes",
        snapshot.cycle,
        stats.timestamp.format("%H:%M:%S"),
        stats.cpu_percent,
        stats.ram_percent,
        stats.process_count
    )
    .ok();
    writeln!(
        out,
        "{:>8} {:<24} {:>7} {:>10} {:<9} {:<12}",
        "PID", "NAME", "CPU%", "MEM", "STATUS", "USER"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(75)).ok();

    for p in &snapshot.processes {
        writeln!(
            out,
            "{:>8} {:<24} {:>7.1} {:>10} {:<9} {:<12}",
            p.pid,
            truncate(&p.name, 24),
            p.cpu_percent,
            format_bytes(p.memory_bytes),
            p.status.as_str(),
            truncate(&p.user, 12)
        )
        .ok();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use herakles_proc_sampler::{ProcessInfo, ProcessStatus, SystemStats};

    #[test]
    fn test_render_snapshot_table() {
        let snapshot = Snapshot {
            cycle: 7,
            stats: SystemStats::new(12.5, 40.0),
            processes: vec![ProcessInfo {
                pid: 4242,
                name: "a-really-long-process-name-that-overflows".into(),
                cpu_percent: 99.5,
                memory_bytes: 2048,
                status: ProcessStatus::Running,
                user: "alice".into(),
            }],
        };
        let table = render_snapshot_table(&snapshot);
        assert!(table.starts_with("cycle 7"));
        assert!(table.contains("4242"));
        assert!(table.contains("99.5"));
        assert!(table.contains("2.0 KB"));
        assert!(table.contains('…'));
    }

    #[test]
    fn test_open_missing_replay_fails() {
        assert!(open_source(Some(Path::new("/nonexistent/replay.json"))).is_err());
    }
}
