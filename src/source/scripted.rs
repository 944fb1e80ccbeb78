//! Replay source: serves process tables from a prepared script.
//!
//! Each call to `list_processes` returns the next frame. Sample instants are
//! synthesized from each frame's `at_secs` offset, so CPU percentages come out
//! the same no matter how fast the script is replayed.

use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{ResolvedProcess, SnapshotSource};
use crate::error::{ConfigError, SourceError, TerminateError};
use crate::process::{Pid, ProcessSample, ProcessStatus, SystemInfo, SystemStats};
use crate::protected::OperatingSystem;
use crate::termination::TerminationMode;

fn default_core_count() -> usize {
    1
}

/// One process in a replay frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayProcess {
    pub pid: Pid,
    #[serde(default)]
    pub start_time: u64,
    pub name: String,
    /// Cumulative CPU seconds at this frame.
    #[serde(default)]
    pub cpu_time_seconds: f64,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub status: ProcessStatus,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub cmdline: String,
}

impl ReplayProcess {
    pub fn new(pid: Pid, name: impl Into<String>, cpu_time_seconds: f64) -> Self {
        Self {
            pid,
            start_time: u64::from(pid),
            name: name.into(),
            cpu_time_seconds,
            memory_bytes: 0,
            status: ProcessStatus::Running,
            user: String::new(),
            cmdline: String::new(),
        }
    }
}

/// One scripted process-table reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Seconds since the start of the script.
    pub at_secs: f64,
    /// When set, listing this frame fails as if the table were unreadable.
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub ram_percent: f64,
    #[serde(default)]
    pub processes: Vec<ReplayProcess>,
}

impl ReplayFrame {
    pub fn new(at_secs: f64, processes: Vec<ReplayProcess>) -> Self {
        Self {
            at_secs,
            unavailable: false,
            cpu_percent: 0.0,
            ram_percent: 0.0,
            processes,
        }
    }

    pub fn unavailable(at_secs: f64) -> Self {
        Self {
            unavailable: true,
            ..Self::new(at_secs, Vec::new())
        }
    }
}

/// Serialized replay document (JSON or YAML).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub version: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default = "default_core_count")]
    pub core_count: usize,
    /// Loop back to the first frame after the last one.
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub ram_total: u64,
    /// Pids whose termination fails with "access denied".
    #[serde(default)]
    pub permission_denied: Vec<Pid>,
    pub frames: Vec<ReplayFrame>,
}

impl ReplayScript {
    pub fn new(core_count: usize, frames: Vec<ReplayFrame>) -> Self {
        Self {
            version: "1.0".to_string(),
            generated_at: String::new(),
            core_count,
            repeat: false,
            ram_total: 0,
            permission_denied: Vec::new(),
            frames,
        }
    }

    /// Loads a script, choosing the parser by file extension (`.json`,
    /// otherwise YAML).
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let script: Self = if is_json {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                format: "JSON",
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                format: "YAML",
                message: e.to_string(),
            })?
        };

        script
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("replay script {}: {e}", path.display())))?;
        info!(
            "Loaded replay script version {} with {} frames from {}",
            script.version,
            script.frames.len(),
            path.display()
        );
        Ok(script)
    }

    /// Checks that the script has frames and that `at_secs` offsets are
    /// finite, non-negative and never decrease.
    pub fn validate(&self) -> Result<(), String> {
        if self.frames.is_empty() {
            return Err("no frames".to_string());
        }
        let mut previous = 0.0;
        for (index, frame) in self.frames.iter().enumerate() {
            let at = frame.at_secs;
            if !at.is_finite() || at < 0.0 {
                return Err(format!("frame {index} has invalid at_secs {at}"));
            }
            if Duration::try_from_secs_f64(at).is_err() {
                return Err(format!("frame {index} at_secs {at} is out of range"));
            }
            if at < previous {
                return Err(format!(
                    "frame {index} at_secs {at} is earlier than the previous frame ({previous})"
                ));
            }
            previous = at;
        }
        Ok(())
    }

    /// Script length in seconds, used to shift time when repeating.
    fn span_secs(&self) -> f64 {
        let last = self.frames.last().map(|f| f.at_secs).unwrap_or(0.0);
        let step = match self.frames.len() {
            0 | 1 => 1.0,
            n => (self.frames[n - 1].at_secs - self.frames[n - 2].at_secs).max(0.0),
        };
        last + step
    }

    /// Cumulative CPU a process gains over one pass of the script.
    fn cpu_span(&self, pid: Pid) -> f64 {
        let find = |frame: Option<&ReplayFrame>| {
            frame
                .and_then(|f| f.processes.iter().find(|p| p.pid == pid))
                .map(|p| p.cpu_time_seconds)
        };
        match (find(self.frames.first()), find(self.frames.last())) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    cursor: usize,
    current: Option<usize>,
    killed: HashSet<Pid>,
    terminate_calls: Vec<(Pid, TerminationMode)>,
    list_calls: u64,
}

/// [`SnapshotSource`] that replays a [`ReplayScript`].
#[derive(Debug)]
pub struct ScriptedSource {
    script: ReplayScript,
    started: Instant,
    state: Mutex<ReplayState>,
}

impl ScriptedSource {
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script,
            started: Instant::now(),
            state: Mutex::new(ReplayState::default()),
        }
    }

    pub fn from_frames(core_count: usize, frames: Vec<ReplayFrame>) -> Self {
        Self::new(ReplayScript::new(core_count, frames))
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        ReplayScript::from_path(path).map(Self::new)
    }

    pub fn script(&self) -> &ReplayScript {
        &self.script
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Every termination request received, in order, including failed ones.
    pub fn terminate_calls(&self) -> Vec<(Pid, TerminationMode)> {
        self.state().terminate_calls.clone()
    }

    /// Number of `list_processes` calls so far.
    pub fn list_calls(&self) -> u64 {
        self.state().list_calls
    }

    fn current_frame<'a>(&'a self, state: &ReplayState) -> Option<&'a ReplayFrame> {
        let len = self.script.frames.len();
        if len == 0 {
            return None;
        }
        self.script.frames.get(state.current.unwrap_or(0) % len)
    }

    fn find_live<'a>(&'a self, state: &ReplayState, pid: Pid) -> Option<&'a ReplayProcess> {
        if state.killed.contains(&pid) {
            return None;
        }
        self.current_frame(state)?.processes.iter().find(|p| p.pid == pid)
    }
}

impl SnapshotSource for ScriptedSource {
    fn list_processes(&self) -> Result<Vec<ProcessSample>, SourceError> {
        let mut state = self.state();
        state.list_calls += 1;

        let len = self.script.frames.len();
        if len == 0 {
            return Err(SourceError::Unavailable("replay script has no frames".to_string()));
        }
        let index = state.cursor;
        if index >= len && !self.script.repeat {
            return Err(SourceError::Unavailable("replay script exhausted".to_string()));
        }
        state.cursor += 1;
        state.current = Some(index);

        let frame = &self.script.frames[index % len];
        if frame.unavailable {
            debug!("Replay frame {} is marked unavailable", index);
            return Err(SourceError::Unavailable(format!("scripted failure at frame {index}")));
        }

        let pass = (index / len) as f64;
        let offset = frame.at_secs + pass * self.script.span_secs();
        let sampled_at = Duration::try_from_secs_f64(offset.max(0.0))
            .ok()
            .and_then(|d| self.started.checked_add(d))
            .ok_or_else(|| {
                SourceError::Unavailable(format!("frame {index} time offset {offset}s is out of range"))
            })?;

        Ok(frame
            .processes
            .iter()
            .filter(|p| !state.killed.contains(&p.pid))
            .map(|p| ProcessSample {
                pid: p.pid,
                start_time: p.start_time,
                name: p.name.clone(),
                cpu_time_seconds: p.cpu_time_seconds + pass * self.script.cpu_span(p.pid),
                memory_bytes: p.memory_bytes,
                status: p.status,
                user: p.user.clone(),
                cmdline: p.cmdline.clone(),
                sampled_at,
            })
            .collect())
    }

    fn read_system_stats(&self) -> SystemStats {
        let state = self.state();
        match self.current_frame(&state) {
            Some(frame) => SystemStats::new(frame.cpu_percent, frame.ram_percent),
            None => SystemStats::new(0.0, 0.0),
        }
    }

    fn resolve(&self, pid: Pid) -> Result<ResolvedProcess, TerminateError> {
        let state = self.state();
        self.find_live(&state, pid)
            .map(|p| ResolvedProcess {
                pid,
                start_time: p.start_time,
                name: p.name.clone(),
                status: p.status,
            })
            .ok_or(TerminateError::NotFound(pid))
    }

    fn terminate(&self, pid: Pid, mode: TerminationMode) -> Result<(), TerminateError> {
        let mut state = self.state();
        state.terminate_calls.push((pid, mode));

        if self.script.permission_denied.contains(&pid) {
            return Err(TerminateError::PermissionDenied(pid));
        }
        if state.killed.contains(&pid) {
            return Err(TerminateError::AlreadyExited(pid));
        }
        if self.find_live(&state, pid).is_none() {
            return Err(TerminateError::NotFound(pid));
        }
        state.killed.insert(pid);
        Ok(())
    }

    fn core_count(&self) -> usize {
        self.script.core_count.max(1)
    }

    fn system_info(&self) -> SystemInfo {
        let ram_percent = self.read_system_stats().ram_percent.clamp(0.0, 100.0);
        let ram_total = self.script.ram_total;
        SystemInfo {
            os: OperatingSystem::current(),
            os_version: format!("replay script v{}", self.script.version),
            cpu_physical: None,
            cpu_logical: self.core_count(),
            ram_total,
            ram_available: (ram_total as f64 * (1.0 - ram_percent / 100.0)) as u64,
            boot_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_frame_source() -> ScriptedSource {
        ScriptedSource::from_frames(
            4,
            vec![
                ReplayFrame::new(0.0, vec![ReplayProcess::new(1, "a", 1.0), ReplayProcess::new(2, "b", 0.0)]),
                ReplayFrame::new(2.0, vec![ReplayProcess::new(1, "a", 3.0)]),
            ],
        )
    }

    #[test]
    fn test_frames_advance_and_exhaust() {
        let source = two_frame_source();
        let first = source.list_processes().unwrap();
        let second = source.list_processes().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(
            second[0].sampled_at.duration_since(first[0].sampled_at),
            Duration::from_secs(2)
        );
        assert!(matches!(source.list_processes(), Err(SourceError::Unavailable(_))));
        assert_eq!(source.list_calls(), 3);
    }

    #[test]
    fn test_repeat_shifts_time_and_cpu() {
        let mut script = ReplayScript::new(1, two_frame_source().script().frames.clone());
        script.repeat = true;
        let source = ScriptedSource::new(script);
        let first = source.list_processes().unwrap();
        source.list_processes().unwrap();
        let third = source.list_processes().unwrap();
        let a0 = first.iter().find(|s| s.pid == 1).unwrap();
        let a2 = third.iter().find(|s| s.pid == 1).unwrap();
        assert_eq!(a2.sampled_at.duration_since(a0.sampled_at), Duration::from_secs(4));
        assert!((a2.cpu_time_seconds - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unavailable_frame_fails() {
        let source = ScriptedSource::from_frames(1, vec![ReplayFrame::unavailable(0.0)]);
        assert!(source.list_processes().is_err());
    }

    #[test]
    fn test_terminate_removes_process_from_later_frames() {
        let mut script = ReplayScript::new(1, vec![ReplayFrame::new(0.0, vec![ReplayProcess::new(5, "victim", 0.0)])]);
        script.repeat = true;
        let source = ScriptedSource::new(script);
        source.list_processes().unwrap();

        assert_eq!(source.resolve(5).unwrap().name, "victim");
        source.terminate(5, TerminationMode::Graceful).unwrap();
        assert_eq!(source.resolve(5), Err(TerminateError::NotFound(5)));
        assert_eq!(source.terminate(5, TerminationMode::Force), Err(TerminateError::AlreadyExited(5)));
        assert!(source.list_processes().unwrap().is_empty());
        assert_eq!(source.terminate_calls().len(), 2);
    }

    #[test]
    fn test_permission_denied_pids() {
        let mut script = ReplayScript::new(1, vec![ReplayFrame::new(0.0, vec![ReplayProcess::new(9, "x", 0.0)])]);
        script.permission_denied = vec![9];
        let source = ScriptedSource::new(script);
        assert_eq!(source.terminate(9, TerminationMode::Force), Err(TerminateError::PermissionDenied(9)));
    }

    #[test]
    fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "version: \"1.0\"\ncore_count: 2\nframes:\n  - at_secs: 0\n    processes:\n      - pid: 1\n        name: init\n        status: sleeping\n";
        let yaml_path = dir.path().join("replay.yaml");
        fs::write(&yaml_path, yaml).unwrap();
        let script = ReplayScript::from_path(&yaml_path).unwrap();
        assert_eq!(script.core_count, 2);
        assert_eq!(script.frames[0].processes[0].status, ProcessStatus::Sleeping);

        let json_path = dir.path().join("replay.json");
        fs::write(&json_path, serde_json::to_string(&script).unwrap()).unwrap();
        assert_eq!(ReplayScript::from_path(&json_path).unwrap(), script);

        let empty = dir.path().join("empty.yaml");
        fs::write(&empty, "version: \"1.0\"\nframes: []\n").unwrap();
        assert!(matches!(ReplayScript::from_path(&empty), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_rejects_bad_frame_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            ("negative.yaml", "version: \"1.0\"\nframes:\n  - at_secs: -1.0\n"),
            ("huge.yaml", "version: \"1.0\"\nframes:\n  - at_secs: 1.0e30\n"),
            ("infinite.yaml", "version: \"1.0\"\nframes:\n  - at_secs: .inf\n"),
            (
                "backwards.yaml",
                "version: \"1.0\"\nframes:\n  - at_secs: 2.0\n  - at_secs: 1.0\n",
            ),
        ];
        for (name, body) in cases {
            let path = dir.path().join(name);
            fs::write(&path, body).unwrap();
            assert!(
                matches!(ReplayScript::from_path(&path), Err(ConfigError::Invalid(_))),
                "{name} should be rejected"
            );
        }

        let equal = dir.path().join("equal.yaml");
        fs::write(&equal, "version: \"1.0\"\nframes:\n  - at_secs: 1.0\n  - at_secs: 1.0\n").unwrap();
        assert_eq!(ReplayScript::from_path(&equal).unwrap().frames.len(), 2);
    }

    #[test]
    fn test_out_of_range_offset_is_an_error() {
        let source = ScriptedSource::from_frames(1, vec![ReplayFrame::new(1e30, vec![ReplayProcess::new(1, "a", 0.0)])]);
        assert!(matches!(source.list_processes(), Err(SourceError::Unavailable(_))));

        let source = ScriptedSource::from_frames(1, vec![ReplayFrame::new(f64::INFINITY, Vec::new())]);
        assert!(source.list_processes().is_err());
    }
}
