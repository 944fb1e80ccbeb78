//! Linux snapshot source reading /proc directly.

use ahash::AHashMap as HashMap;
use chrono::DateTime;
use rayon::prelude::*;
use std::ffi::CStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, instrument};

use super::{available_cores, ResolvedProcess, SnapshotSource};
use crate::error::{SourceError, TerminateError};
use crate::process::{Pid, ProcessSample, ProcessStatus, SystemInfo, SystemStats};
use crate::protected::OperatingSystem;
use crate::system::{self, CpuStatsCache};
use crate::termination::TerminationMode;

/// Kernel truncates `comm` to this many bytes.
const COMM_MAX_LEN: usize = 15;

/// Fields of /proc/<pid>/stat the sampler needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StatFields {
    pub comm: String,
    pub state: char,
    /// Clock ticks.
    pub utime: u64,
    /// Clock ticks.
    pub stime: u64,
    /// Clock ticks since boot.
    pub starttime: u64,
    /// Pages.
    pub rss_pages: u64,
}

/// Parses a /proc/<pid>/stat line.
///
/// The command name may contain spaces and parentheses, so it spans from the
/// first '(' to the last ')'.
pub fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close < open {
        return None;
    }
    let comm = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if rest.len() < 22 {
        return None;
    }
    let num = |i: usize| rest[i].parse::<u64>().ok();
    Some(StatFields {
        comm,
        state: rest[0].chars().next()?,
        utime: num(11)?,
        stime: num(12)?,
        starttime: num(19)?,
        rss_pages: rest[21].parse::<i64>().ok()?.max(0) as u64,
    })
}

/// Arguments of a NUL-separated /proc/<pid>/cmdline.
pub fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Picks the display name: the kernel's `comm`, or the executable basename
/// when `comm` was truncated or is empty.
pub fn display_name(comm: &str, args: &[String]) -> String {
    let basename = args
        .first()
        .and_then(|a| Path::new(a).file_name())
        .and_then(|n| n.to_str());

    match basename {
        Some(base) if comm.is_empty() => base.to_string(),
        Some(base) if comm.len() >= COMM_MAX_LEN && base.starts_with(comm) => base.to_string(),
        _ => comm.to_string(),
    }
}

/// Real uid from /proc/<pid>/status content.
pub fn parse_status_uid(content: &str) -> Option<u32> {
    content
        .lines()
        .find_map(|l| l.strip_prefix("Uid:"))
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
}

/// Thread-safe passwd lookup.
fn lookup_user_name(uid: u32) -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: passwd is a plain C struct; all-zero is a valid initial value.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    // SAFETY: every pointer refers to live, correctly sized local storage.
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
        return None;
    }
    // SAFETY: getpwuid_r succeeded, so pw_name points into `buf`, NUL-terminated.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

fn sysconf_or(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf only reads a configuration value.
    let value = unsafe { libc::sysconf(name) };
    if value > 0 {
        value as u64
    } else {
        fallback
    }
}

/// Snapshot source backed by procfs.
#[derive(Debug)]
pub struct ProcfsSource {
    root: PathBuf,
    clock_ticks: f64,
    page_size: u64,
    core_count: usize,
    cpu_stats: CpuStatsCache,
    user_names: Mutex<HashMap<u32, String>>,
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Reads from an alternative procfs mount, e.g. a host's /proc bind
    /// mounted into a container.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let core_count = system::read_core_counts(&root)
            .map(|(logical, _)| logical)
            .unwrap_or_else(|e| {
                debug!("Falling back to available parallelism for core count: {}", e);
                available_cores()
            });
        Self {
            clock_ticks: sysconf_or(libc::_SC_CLK_TCK, 100) as f64,
            page_size: sysconf_or(libc::_SC_PAGESIZE, 4096),
            core_count,
            cpu_stats: CpuStatsCache::new(),
            user_names: Mutex::new(HashMap::new()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_name(&self, uid: u32) -> String {
        if let Some(name) = self
            .user_names
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&uid)
        {
            return name.clone();
        }
        let name = lookup_user_name(uid).unwrap_or_else(|| uid.to_string());
        self.user_names
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(uid, name.clone());
        name
    }

    fn read_stat(&self, pid: Pid) -> io::Result<StatFields> {
        let content = fs::read_to_string(self.root.join(pid.to_string()).join("stat"))?;
        parse_stat(&content).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed stat"))
    }

    fn read_args(&self, pid: Pid) -> Vec<String> {
        fs::read(self.root.join(pid.to_string()).join("cmdline"))
            .map(|raw| parse_cmdline(&raw))
            .unwrap_or_default()
    }

    fn read_sample(&self, pid: Pid) -> Option<ProcessSample> {
        let stat = match self.read_stat(pid) {
            Ok(stat) => stat,
            Err(e) => {
                debug!("Skipping process {}: {}", pid, e);
                return None;
            }
        };
        let sampled_at = Instant::now();

        let args = self.read_args(pid);
        let user = fs::read_to_string(self.root.join(pid.to_string()).join("status"))
            .ok()
            .and_then(|s| parse_status_uid(&s))
            .map(|uid| self.user_name(uid))
            .unwrap_or_default();

        Some(ProcessSample {
            pid,
            start_time: stat.starttime,
            name: display_name(&stat.comm, &args),
            cpu_time_seconds: (stat.utime + stat.stime) as f64 / self.clock_ticks,
            memory_bytes: stat.rss_pages.saturating_mul(self.page_size),
            status: ProcessStatus::from_state_char(stat.state),
            user,
            cmdline: args.join(" "),
            sampled_at,
        })
    }
}

fn numeric_pids(root: &Path) -> Result<Vec<Pid>, SourceError> {
    let entries = fs::read_dir(root)
        .map_err(|e| SourceError::Unavailable(format!("cannot read {}: {}", root.display(), e)))?;
    Ok(entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse::<Pid>().ok()))
        .filter(|pid| *pid > 0)
        .collect())
}

fn map_signal_error(pid: Pid, err: io::Error) -> TerminateError {
    match err.raw_os_error() {
        Some(libc::ESRCH) => TerminateError::AlreadyExited(pid),
        Some(libc::EPERM) => TerminateError::PermissionDenied(pid),
        _ => TerminateError::Os {
            pid,
            message: err.to_string(),
        },
    }
}

impl SnapshotSource for ProcfsSource {
    #[instrument(level = "debug", skip(self))]
    fn list_processes(&self) -> Result<Vec<ProcessSample>, SourceError> {
        let pids = numeric_pids(&self.root)?;
        let samples: Vec<ProcessSample> = pids.par_iter().filter_map(|&pid| self.read_sample(pid)).collect();
        debug!(
            "Read {} of {} process entries",
            samples.len(),
            pids.len()
        );
        Ok(samples)
    }

    fn read_system_stats(&self) -> SystemStats {
        let cpu = match system::read_cpu_stats(&self.root) {
            Ok(stat) => self.cpu_stats.usage_percent(stat),
            Err(e) => {
                debug!("System CPU unavailable: {}", e);
                0.0
            }
        };
        let ram = match system::read_extended_memory_info(&self.root) {
            Ok(mem) => mem.used_percent(),
            Err(e) => {
                debug!("System memory unavailable: {}", e);
                0.0
            }
        };
        SystemStats::new(cpu, ram)
    }

    fn resolve(&self, pid: Pid) -> Result<ResolvedProcess, TerminateError> {
        if pid == 0 {
            return Err(TerminateError::NotFound(pid));
        }
        let stat = self.read_stat(pid).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => TerminateError::PermissionDenied(pid),
            _ => TerminateError::NotFound(pid),
        })?;
        let args = self.read_args(pid);
        Ok(ResolvedProcess {
            pid,
            start_time: stat.starttime,
            name: display_name(&stat.comm, &args),
            status: ProcessStatus::from_state_char(stat.state),
        })
    }

    fn terminate(&self, pid: Pid, mode: TerminationMode) -> Result<(), TerminateError> {
        let target = libc::pid_t::try_from(pid).map_err(|_| TerminateError::NotFound(pid))?;
        if target <= 0 {
            return Err(TerminateError::NotFound(pid));
        }
        let signal = match mode {
            TerminationMode::Graceful => libc::SIGTERM,
            TerminationMode::Force => libc::SIGKILL,
        };
        // SAFETY: kill has no memory-safety preconditions; target is a single positive pid.
        let rc = unsafe { libc::kill(target, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(map_signal_error(pid, io::Error::last_os_error()))
        }
    }

    fn core_count(&self) -> usize {
        self.core_count
    }

    fn system_info(&self) -> SystemInfo {
        let (cpu_logical, cpu_physical) =
            system::read_core_counts(&self.root).unwrap_or((self.core_count, None));
        let memory = system::read_extended_memory_info(&self.root).ok();
        let os_version = fs::read_to_string(self.root.join("sys/kernel/osrelease"))
            .map(|s| format!("Linux {}", s.trim()))
            .unwrap_or_else(|_| "Linux".to_string());

        SystemInfo {
            os: OperatingSystem::Linux,
            os_version,
            cpu_physical,
            cpu_logical,
            ram_total: memory.map(|m| m.total_bytes).unwrap_or(0),
            ram_available: memory.map(|m| m.available_bytes).unwrap_or(0),
            boot_time: system::read_boot_time(&self.root).and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }
}
