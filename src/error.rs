//! Error types for sampling, termination and configuration.
//!
//! Sampling failures are split in two: a [`SourceError`] is a single failed
//! enumeration and is recovered by skipping the cycle, while an [`EngineError`]
//! is fatal and stops the sampling loop.

use std::path::PathBuf;
use thiserror::Error;

use crate::process::Pid;

/// Failure of a whole process-table enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("process table unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a termination request at the OS level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminateError {
    #[error("process {0} does not exist")]
    NotFound(Pid),

    #[error("access denied for process {0}")]
    PermissionDenied(Pid),

    #[error("process {0} exited before it could be terminated")]
    AlreadyExited(Pid),

    #[error("failed to signal process {pid}: {message}")]
    Os { pid: Pid, message: String },
}

/// Fatal sampling engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("snapshot source failed {failures} consecutive times (last error: {last})")]
    SourceFailed { failures: u32, last: SourceError },

    #[error("sampling task aborted: {0}")]
    TaskAborted(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} configuration {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
