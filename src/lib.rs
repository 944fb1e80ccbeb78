//! Process sampling engine.
//!
//! Periodically reads the process table, turns cumulative CPU counters into
//! per-interval percentages through a differential cache, ranks and caps the
//! result, and hands it to consumers through a single-slot mailbox. Process
//! termination goes through a protected-name gate first.
//!
//! ```no_run
//! use herakles_proc_sampler::{EngineConfig, Monitor};
//! use std::time::Duration;
//!
//! # async fn run() {
//! let monitor = Monitor::for_current_os(EngineConfig::default());
//! monitor.start(Duration::from_secs(2));
//! tokio::time::sleep(Duration::from_secs(5)).await;
//! if let Some(snapshot) = monitor.latest_snapshot() {
//!     for p in &snapshot.processes {
//!         println!("{:>7} {:5.1}% {}", p.pid, p.cpu_percent, p.name);
//!     }
//! }
//! monitor.stop().await;
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod health_stats;
pub mod monitor;
pub mod process;
pub mod protected;
pub mod ranking;
pub mod source;
pub mod system;
pub mod termination;

pub use engine::{EngineConfig, EngineState, EngineStatus};
pub use error::{ConfigError, EngineError, SourceError, TerminateError};
pub use monitor::Monitor;
pub use process::{Pid, ProcessInfo, ProcessStatus, Snapshot, SystemInfo, SystemStats};
pub use protected::{is_protected, OperatingSystem};
pub use ranking::SortKey;
pub use source::SnapshotSource;
pub use termination::{TerminationMode, TerminationOutcome};
