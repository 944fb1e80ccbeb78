//! CLI arguments and subcommands for herakles-proc-sampler.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use herakles_proc_sampler::{OperatingSystem, SortKey};

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Snapshot output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Yaml,
    Json,
    Toml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortArg {
    Cpu,
    Memory,
    Pid,
    Name,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Cpu => SortKey::Cpu,
            SortArg::Memory => SortKey::Memory,
            SortArg::Pid => SortKey::Pid,
            SortArg::Name => SortKey::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OsArg {
    Linux,
    Windows,
    Macos,
}

impl From<OsArg> for OperatingSystem {
    fn from(arg: OsArg) -> Self {
        match arg {
            OsArg::Linux => OperatingSystem::Linux,
            OsArg::Windows => OperatingSystem::Windows,
            OsArg::Macos => OperatingSystem::MacOs,
        }
    }
}

/// Largest pid any supported kernel hands out.
const MAX_PID: u32 = 2_147_483_647;

/// Parses a pid argument, rejecting 0 and values outside the signed range.
pub fn validate_pid(s: &str) -> Result<u32, String> {
    let pid: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a valid process id"))?;
    if pid == 0 || pid > MAX_PID {
        return Err(format!("process id must be between 1 and {MAX_PID}"));
    }
    Ok(pid)
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-proc-sampler",
    about = "Low-latency process sampler with guarded termination",
    long_about = "Low-latency process sampler with guarded termination.\n\n\
                  Samples the process table on a fixed interval, computes per-interval CPU \
                  usage with a differential cache, ranks the busiest processes and refuses to \
                  terminate protected system processes.",
    author = "Michael Moll <proc-mem@herakles.io> - Herakles IO",
    version = "0.1.0",
    propagate_version = true,
    after_help = "Project: https://github.com/herakles-io/herakles-proc-sampler"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (overrides the config file; default info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Sampling interval in seconds
    #[arg(short = 'i', long)]
    pub interval: Option<f64>,

    /// Maximum number of processes shown per snapshot
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Processes whose CPU delta is recomputed every cycle (0 = all)
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Sort order
    #[arg(short = 's', long, value_enum)]
    pub sort: Option<SortArg>,

    /// Show only processes whose name contains this text (case-insensitive)
    #[arg(short = 'f', long)]
    pub filter: Option<String>,

    /// Replay a recorded or generated script instead of reading the OS
    #[arg(long)]
    pub replay: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Continuously print the busiest processes (default)
    Watch {
        /// Stop after N published snapshots
        #[arg(long)]
        cycles: Option<u64>,

        /// Print cycle timing statistics under each table
        #[arg(long)]
        stats: bool,
    },

    /// Sample a few cycles and print the final snapshot
    Snapshot {
        /// Cycles to sample; the first one only establishes CPU baselines
        #[arg(long, default_value_t = 2)]
        cycles: u64,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Terminate a process, unless it is a protected system process
    Kill {
        /// Process id
        #[arg(value_parser = validate_pid)]
        pid: u32,

        /// Kill immediately instead of asking the process to exit first
        #[arg(long)]
        force: bool,
    },

    /// List the protected process names
    Protected {
        /// Operating system (defaults to the running one)
        #[arg(long, value_enum)]
        os: Option<OsArg>,
    },

    /// Show static system information
    Info,

    /// Validate configuration and the process source
    Check,

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Generate a synthetic replay script for --replay
    GenerateReplay {
        /// Output file path (.json or .yaml)
        #[arg(short = 'o', long, default_value = "replay.json")]
        output: PathBuf,

        /// Number of processes per frame
        #[arg(long, default_value_t = 40)]
        processes: usize,

        /// Number of frames
        #[arg(long, default_value_t = 10)]
        frames: usize,

        /// Seconds between frames
        #[arg(long, default_value_t = 2.0)]
        interval: f64,

        /// Loop the script when it runs out
        #[arg(long)]
        repeat: bool,
    },
}
