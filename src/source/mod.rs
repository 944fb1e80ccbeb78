//! Snapshot sources: where process and system readings come from.
//!
//! Each platform gets its own implementation of [`SnapshotSource`]; which one
//! runs is decided by [`for_os`], a plain function of the operating system.

use crate::error::{SourceError, TerminateError};
use crate::process::{Pid, ProcessSample, ProcessStatus, SystemInfo, SystemStats};
use crate::protected::OperatingSystem;
use crate::termination::TerminationMode;

pub mod portable;
#[cfg(target_os = "linux")]
pub mod procfs;
pub mod scripted;

pub use portable::PortableSource;
#[cfg(target_os = "linux")]
pub use procfs::ProcfsSource;
pub use scripted::{ReplayFrame, ReplayProcess, ReplayScript, ScriptedSource};

/// Fresh, uncached view of one process, used by termination requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProcess {
    pub pid: Pid,
    pub start_time: u64,
    pub name: String,
    pub status: ProcessStatus,
}

/// Source of process and system readings.
///
/// All methods block on OS I/O; async callers run them on a blocking thread.
pub trait SnapshotSource: Send + Sync {
    /// Reads every visible process.
    ///
    /// Processes that vanish or deny access mid-enumeration are skipped; only
    /// a failure to enumerate the table at all is an error.
    fn list_processes(&self) -> Result<Vec<ProcessSample>, SourceError>;

    /// Overall CPU and memory usage. Never fails; unreadable figures are 0.
    fn read_system_stats(&self) -> SystemStats;

    /// Looks `pid` up right now, bypassing any cache.
    fn resolve(&self, pid: Pid) -> Result<ResolvedProcess, TerminateError>;

    /// Sends a termination signal to `pid`.
    fn terminate(&self, pid: Pid, mode: TerminationMode) -> Result<(), TerminateError>;

    /// Logical CPUs, used to bound per-process CPU percentages.
    fn core_count(&self) -> usize;

    fn system_info(&self) -> SystemInfo;
}

/// Builds the source for `os`.
///
/// Linux reads procfs directly; every other platform goes through `sysinfo`.
pub fn for_os(os: OperatingSystem) -> Box<dyn SnapshotSource> {
    match os {
        #[cfg(target_os = "linux")]
        OperatingSystem::Linux => Box::new(ProcfsSource::new()),
        _ => Box::new(PortableSource::new()),
    }
}

/// Logical CPUs as seen by the standard library, at least 1.
pub(crate) fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
