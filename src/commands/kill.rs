//! Kill command: guarded termination of one process.

use herakles_proc_sampler::format::permission_hint;
use herakles_proc_sampler::{Monitor, Pid, TerminateError, TerminationMode, TerminationOutcome};

/// Prints the outcome; exits with status 1 unless the process was terminated.
pub async fn command_kill(monitor: &Monitor, pid: Pid, force: bool) -> anyhow::Result<()> {
    let mode = if force {
        TerminationMode::Force
    } else {
        TerminationMode::Graceful
    };

    match monitor.request_termination_with(pid, mode).await {
        TerminationOutcome::Terminated { pid, name } => {
            println!("✅ Terminated {} (PID {})", name, pid);
            Ok(())
        }
        TerminationOutcome::Denied { pid, name, reason } => {
            println!("⛔ Refused to terminate {} (PID {}): {}", name, pid, reason);
            std::process::exit(1);
        }
        TerminationOutcome::Failed { pid, cause } => {
            println!("❌ Failed to terminate PID {}: {}", pid, cause);
            if matches!(cause, TerminateError::PermissionDenied(_)) {
                println!("   💡 {}", permission_hint(monitor.os()));
            }
            std::process::exit(1);
        }
    }
}
