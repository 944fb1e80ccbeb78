//! Guarded process termination.
//!
//! Every request re-resolves the target's current name and checks it against
//! the protected set before any signal is sent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::TerminateError;
use crate::process::{Pid, ProcessStatus};
use crate::protected::{is_protected, OperatingSystem};
use crate::source::SnapshotSource;

/// How long a graceful termination waits before escalating.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminationMode {
    /// SIGTERM (or the platform equivalent), then a forced kill once the
    /// grace period runs out.
    #[default]
    Graceful,
    /// Immediate SIGKILL.
    Force,
}

impl fmt::Display for TerminationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => f.write_str("graceful"),
            Self::Force => f.write_str("force"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    ProtectedProcess,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtectedProcess => f.write_str("protected system process"),
        }
    }
}

/// Result of a termination request. Never an engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    Terminated { pid: Pid, name: String },
    /// Refused before any signal was sent.
    Denied { pid: Pid, name: String, reason: DenialReason },
    Failed { pid: Pid, cause: TerminateError },
}

impl TerminationOutcome {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

impl fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated { pid, name } => write!(f, "terminated {name} (pid {pid})"),
            Self::Denied { pid, name, reason } => {
                write!(f, "refused to terminate {name} (pid {pid}): {reason}")
            }
            Self::Failed { pid, cause } => write!(f, "failed to terminate pid {pid}: {cause}"),
        }
    }
}

/// Terminates `pid` unless its current name is protected on `os`.
///
/// Graceful mode blocks for up to `grace` waiting for the process to exit,
/// then sends a forced kill. A process that is already gone by then counts
/// as terminated.
pub fn terminate_guarded(
    source: &dyn SnapshotSource,
    os: OperatingSystem,
    pid: Pid,
    mode: TerminationMode,
    grace: Duration,
) -> TerminationOutcome {
    let target = match source.resolve(pid) {
        Ok(target) => target,
        Err(cause) => {
            warn!("Cannot terminate pid {}: {}", pid, cause);
            return TerminationOutcome::Failed { pid, cause };
        }
    };

    if is_protected(&target.name, os) {
        warn!("Refusing to terminate protected process {} (pid {})", target.name, pid);
        return TerminationOutcome::Denied {
            pid,
            name: target.name,
            reason: DenialReason::ProtectedProcess,
        };
    }

    if let Err(cause) = source.terminate(pid, mode) {
        warn!("Failed to {} terminate {} (pid {}): {}", mode, target.name, pid, cause);
        return TerminationOutcome::Failed { pid, cause };
    }

    if mode == TerminationMode::Graceful && !wait_for_exit(source, pid, target.start_time, grace) {
        debug!("pid {} still alive after {:?}, escalating", pid, grace);
        match source.terminate(pid, TerminationMode::Force) {
            Ok(()) | Err(TerminateError::NotFound(_)) | Err(TerminateError::AlreadyExited(_)) => {}
            Err(cause) => {
                warn!("Forced kill of {} (pid {}) failed: {}", target.name, pid, cause);
                return TerminationOutcome::Failed { pid, cause };
            }
        }
    }

    info!("Terminated {} (pid {}, {})", target.name, pid, mode);
    TerminationOutcome::Terminated {
        pid,
        name: target.name,
    }
}

/// Polls until the process instance identified by `pid` and `start_time`
/// is gone or a zombie. Returns `false` on timeout.
fn wait_for_exit(source: &dyn SnapshotSource, pid: Pid, start_time: u64, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match source.resolve(pid) {
            Ok(p) if p.start_time != start_time || p.status == ProcessStatus::Zombie => return true,
            Ok(_) => {}
            Err(_) => return true,
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}
