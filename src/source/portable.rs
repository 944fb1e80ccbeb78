//! Cross-platform snapshot source built on the `sysinfo` crate.
//!
//! Used everywhere except Linux, where [`super::ProcfsSource`] reads /proc
//! directly.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind, Users};
use tracing::debug;

use super::{available_cores, ResolvedProcess, SnapshotSource};
use crate::error::{SourceError, TerminateError};
use crate::process::{Pid, ProcessSample, ProcessStatus, SystemInfo, SystemStats};
use crate::protected::OperatingSystem;
use crate::termination::TerminationMode;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn map_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    use sysinfo::ProcessStatus as S;
    match status {
        S::Run => ProcessStatus::Running,
        S::Sleep | S::Idle | S::UninterruptibleDiskSleep | S::Waking | S::Parked => ProcessStatus::Sleeping,
        S::Stop | S::Tracing => ProcessStatus::Stopped,
        S::Zombie | S::Dead => ProcessStatus::Zombie,
        _ => ProcessStatus::Unknown,
    }
}

fn sampling_refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .with_cpu()
        .with_memory()
        .with_user(UpdateKind::OnlyIfNotSet)
        .with_cmd(UpdateKind::OnlyIfNotSet)
}

/// Snapshot source for any platform `sysinfo` supports.
pub struct PortableSource {
    /// Long-lived system used by the sampling loop; keeps CPU baselines.
    sampler: Mutex<System>,
    /// Separate instance for termination lookups so they never wait on a
    /// full process refresh.
    lookup: Mutex<System>,
    users: Mutex<Users>,
    core_count: usize,
}

impl Default for PortableSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PortableSource {
    pub fn new() -> Self {
        Self {
            sampler: Mutex::new(System::new()),
            lookup: Mutex::new(System::new()),
            users: Mutex::new(Users::new_with_refreshed_list()),
            core_count: available_cores(),
        }
    }

    fn refreshed_lookup(&self, pid: Pid) -> MutexGuard<'_, System> {
        let mut system = lock(&self.lookup);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        system
    }
}

impl SnapshotSource for PortableSource {
    fn list_processes(&self) -> Result<Vec<ProcessSample>, SourceError> {
        let mut system = lock(&self.sampler);
        let refreshed = system.refresh_processes_specifics(ProcessesToUpdate::All, true, sampling_refresh_kind());
        let sampled_at = Instant::now();
        if refreshed == 0 && system.processes().is_empty() {
            return Err(SourceError::Unavailable("sysinfo returned no processes".to_string()));
        }

        let mut users = lock(&self.users);
        let missing_user = system
            .processes()
            .values()
            .filter_map(|p| p.user_id())
            .any(|uid| users.get_user_by_id(uid).is_none());
        if missing_user {
            users.refresh();
        }

        let samples: Vec<ProcessSample> = system
            .processes()
            .values()
            .map(|p| ProcessSample {
                pid: p.pid().as_u32(),
                start_time: p.start_time(),
                name: p.name().to_string_lossy().into_owned(),
                cpu_time_seconds: p.accumulated_cpu_time() as f64 / 1000.0,
                memory_bytes: p.memory(),
                status: map_status(p.status()),
                user: p
                    .user_id()
                    .and_then(|uid| users.get_user_by_id(uid))
                    .map(|u| u.name().to_string())
                    .unwrap_or_default(),
                cmdline: p
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" "),
                sampled_at,
            })
            .collect();
        debug!("sysinfo listed {} processes", samples.len());
        Ok(samples)
    }

    fn read_system_stats(&self) -> SystemStats {
        let mut system = lock(&self.sampler);
        system.refresh_cpu_usage();
        system.refresh_memory();
        let total = system.total_memory();
        let ram = if total > 0 {
            total.saturating_sub(system.available_memory()) as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        SystemStats::new(f64::from(system.global_cpu_usage()), ram)
    }

    fn resolve(&self, pid: Pid) -> Result<ResolvedProcess, TerminateError> {
        let system = self.refreshed_lookup(pid);
        let process = system
            .process(SysPid::from_u32(pid))
            .ok_or(TerminateError::NotFound(pid))?;
        Ok(ResolvedProcess {
            pid,
            start_time: process.start_time(),
            name: process.name().to_string_lossy().into_owned(),
            status: map_status(process.status()),
        })
    }

    fn terminate(&self, pid: Pid, mode: TerminationMode) -> Result<(), TerminateError> {
        let system = self.refreshed_lookup(pid);
        let process = system
            .process(SysPid::from_u32(pid))
            .ok_or(TerminateError::AlreadyExited(pid))?;

        let signal = match mode {
            TerminationMode::Graceful => Signal::Term,
            TerminationMode::Force => Signal::Kill,
        };
        // Platforms without the requested signal fall back to the native kill.
        let sent = process.kill_with(signal).unwrap_or_else(|| process.kill());
        if sent {
            return Ok(());
        }
        drop(system);

        let system = self.refreshed_lookup(pid);
        if system.process(SysPid::from_u32(pid)).is_some() {
            Err(TerminateError::PermissionDenied(pid))
        } else {
            Err(TerminateError::AlreadyExited(pid))
        }
    }

    fn core_count(&self) -> usize {
        self.core_count
    }

    fn system_info(&self) -> SystemInfo {
        let mut system = lock(&self.lookup);
        system.refresh_memory();
        let boot = System::boot_time();
        SystemInfo {
            os: OperatingSystem::current(),
            os_version: System::long_os_version().unwrap_or_else(|| OperatingSystem::current().to_string()),
            cpu_physical: None,
            cpu_logical: self.core_count,
            ram_total: system.total_memory(),
            ram_available: system.available_memory(),
            boot_time: i64::try_from(boot)
                .ok()
                .filter(|secs| *secs > 0)
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
        }
    }
}
