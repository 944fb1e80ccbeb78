//! Generate replay command implementation.
//!
//! Writes a synthetic replay script for `--replay`: a fixed process set
//! whose cumulative CPU time grows frame by frame.

use anyhow::ensure;
use chrono::Utc;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use herakles_proc_sampler::process::{Pid, ProcessStatus};
use herakles_proc_sampler::source::{ReplayFrame, ReplayProcess, ReplayScript};

const GENERATED_CORES: usize = 4;
const FIRST_PID: Pid = 1000;
const GIB: u64 = 1024 * 1024 * 1024;

const NAMES: &[&str] = &[
    "nginx", "postgres", "redis-server", "java", "node", "python3", "mysqld", "dockerd",
    "containerd", "sshd", "bash", "chrome", "firefox", "code", "rustc", "cargo", "gnome-shell",
    "Xorg", "pulseaudio", "cron",
];

/// Generates a replay script and writes it as JSON or YAML by extension.
pub fn command_generate_replay(
    output: PathBuf,
    processes: usize,
    frames: usize,
    interval: f64,
    repeat: bool,
) -> anyhow::Result<()> {
    ensure!(frames > 0, "--frames must be at least 1");
    ensure!(
        interval.is_finite() && interval > 0.0,
        "--interval must be a positive number of seconds"
    );

    let mut rng = rand::thread_rng();
    let script = generate_script(&mut rng, processes, frames, interval, repeat);
    write_script(&output, &script)?;

    println!(
        "✅ Generated replay: {} processes x {} frames in {}",
        processes,
        frames,
        output.display()
    );
    Ok(())
}

fn generate_script(
    rng: &mut impl Rng,
    processes: usize,
    frames: usize,
    interval: f64,
    repeat: bool,
) -> ReplayScript {
    // Fraction of one core each process burns per second.
    let mut base: Vec<ReplayProcess> = Vec::with_capacity(processes);
    let mut loads: Vec<f64> = Vec::with_capacity(processes);
    for i in 0..processes {
        let pid = FIRST_PID + i as Pid;
        let name = match NAMES.get(i) {
            Some(name) => (*name).to_string(),
            None => format!("worker-{}", i + 1),
        };
        let mut process = ReplayProcess::new(pid, name.clone(), rng.gen_range(0.0..10_000.0));
        process.memory_bytes = rng.gen_range(4 * 1024 * 1024..2 * GIB);
        process.user = if i % 3 == 0 { "root".into() } else { "app".into() };
        process.cmdline = format!("/usr/bin/{}", name);
        process.status = if rng.gen_bool(0.2) {
            ProcessStatus::Running
        } else {
            ProcessStatus::Sleeping
        };
        base.push(process);
        // Mostly idle with a few hot processes.
        let load = if rng.gen_bool(0.1) {
            rng.gen_range(0.5..1.0)
        } else {
            rng.gen_range(0.0..0.05)
        };
        loads.push(load);
    }

    let ram_total = 16 * GIB;
    let mut out = Vec::with_capacity(frames);
    for frame in 0..frames {
        let at_secs = frame as f64 * interval;
        let procs: Vec<ReplayProcess> = base
            .iter()
            .zip(&loads)
            .map(|(p, load)| {
                let mut p = p.clone();
                p.cpu_time_seconds += load * at_secs;
                p
            })
            .collect();

        let used: u64 = procs.iter().map(|p| p.memory_bytes).sum();
        let mut f = ReplayFrame::new(at_secs, procs);
        f.cpu_percent = (loads.iter().sum::<f64>() / GENERATED_CORES as f64 * 100.0).min(100.0);
        f.ram_percent = (used as f64 / ram_total as f64 * 100.0).min(100.0);
        out.push(f);
    }
    debug!("Generated {} frames for {} processes", frames, processes);

    let mut script = ReplayScript::new(GENERATED_CORES, out);
    script.generated_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    script.repeat = repeat;
    script.ram_total = ram_total;
    script
}

fn write_script(path: &Path, script: &ReplayScript) -> anyhow::Result<()> {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let content = if is_yaml {
        serde_yaml::to_string(script)?
    } else {
        serde_json::to_string_pretty(script)?
    };
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_time_is_monotonic_per_process() {
        let mut rng = rand::thread_rng();
        let script = generate_script(&mut rng, 25, 6, 2.0, false);
        assert_eq!(script.frames.len(), 6);
        for window in script.frames.windows(2) {
            assert!(window[1].at_secs > window[0].at_secs);
            for (a, b) in window[0].processes.iter().zip(&window[1].processes) {
                assert_eq!(a.pid, b.pid);
                assert!(b.cpu_time_seconds >= a.cpu_time_seconds);
            }
        }
        assert!(script.frames[0].processes.iter().any(|p| p.name.starts_with("worker-")));
    }

    #[test]
    fn test_written_script_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["replay.json", "replay.yaml"] {
            let path = dir.path().join(name);
            command_generate_replay(path.clone(), 5, 3, 1.5, true).unwrap();
            let script = ReplayScript::from_path(&path).unwrap();
            assert_eq!(script.frames.len(), 3);
            assert!(script.repeat);
            assert_eq!(script.core_count, GENERATED_CORES);
        }
    }

    #[test]
    fn test_rejects_zero_frames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(command_generate_replay(dir.path().join("r.json"), 5, 0, 2.0, false).is_err());
    }
}
