//! Configuration file loading and validation.
//!
//! Every field is optional: a missing key falls back to the built-in
//! default, and command-line flags override both.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::ranking::{normalize_filter, SortKey};

pub const DEFAULT_INTERVAL_SECS: f64 = 2.0;
pub const DEFAULT_DISPLAY_LIMIT: usize = 100;
pub const DEFAULT_TOP_K: usize = 50;
pub const DEFAULT_FULL_REFRESH_EVERY: u32 = 5;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_GRACE_PERIOD_SECS: f64 = 3.0;

/// Searched in order when no explicit path is given.
pub const DEFAULT_LOCATIONS: &[&str] = &[
    "/etc/herakles/proc-sampler.yaml",
    "/etc/herakles/proc-sampler.yml",
    "/etc/herakles/proc-sampler.json",
    "./herakles-proc-sampler.yaml",
    "./herakles-proc-sampler.yml",
    "./herakles-proc-sampler.json",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Sampling loop
    #[serde(alias = "interval")]
    pub interval_secs: Option<f64>,
    #[serde(alias = "display-limit", alias = "limit")]
    pub display_limit: Option<usize>,
    #[serde(alias = "max-consecutive-failures")]
    pub max_consecutive_failures: Option<u32>,

    // Differential cache
    #[serde(alias = "top-k")]
    pub top_k: Option<usize>,
    #[serde(alias = "full-refresh-every")]
    pub full_refresh_every: Option<u32>,

    // View
    /// "cpu" | "memory" | "pid" | "name"
    #[serde(alias = "sort-by", alias = "sort")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    // Termination
    #[serde(alias = "grace-period-secs")]
    pub grace_period_secs: Option<f64>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: Some(DEFAULT_INTERVAL_SECS),
            display_limit: Some(DEFAULT_DISPLAY_LIMIT),
            max_consecutive_failures: Some(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            top_k: Some(DEFAULT_TOP_K),
            full_refresh_every: Some(DEFAULT_FULL_REFRESH_EVERY),
            sort_by: Some(SortKey::Cpu.as_str().to_string()),
            filter: None,
            grace_period_secs: Some(DEFAULT_GRACE_PERIOD_SECS),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    /// Resolves the engine settings, filling gaps with defaults.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        validate_effective_config(self)?;
        let sort_key = match self.sort_by.as_deref() {
            Some(key) => key.parse::<SortKey>().map_err(ConfigError::Invalid)?,
            None => SortKey::default(),
        };
        Ok(EngineConfig {
            interval: seconds("interval_secs", self.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS))?,
            display_limit: self.display_limit.unwrap_or(DEFAULT_DISPLAY_LIMIT),
            top_k: self.top_k.unwrap_or(DEFAULT_TOP_K),
            full_refresh_every: self.full_refresh_every.unwrap_or(DEFAULT_FULL_REFRESH_EVERY),
            max_consecutive_failures: self
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            sort_key,
            filter: normalize_filter(self.filter.clone()),
            grace_period: seconds(
                "grace_period_secs",
                self.grace_period_secs.unwrap_or(DEFAULT_GRACE_PERIOD_SECS),
            )?,
        })
    }
}

/// Converts a seconds setting, rejecting values no `Duration` can hold.
fn seconds(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ConfigError::Invalid(format!("{key} out of range ({secs}): {e}")))
}

/// Validates effective config (used by `--check-config` and at startup).
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(secs) = cfg.interval_secs {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "interval_secs must be a positive number, got {secs}"
            )));
        }
        seconds("interval_secs", secs)?;
    }
    if cfg.display_limit == Some(0) {
        return Err(ConfigError::Invalid("display_limit must be at least 1".into()));
    }
    if cfg.full_refresh_every == Some(0) {
        return Err(ConfigError::Invalid("full_refresh_every must be at least 1".into()));
    }
    if cfg.max_consecutive_failures == Some(0) {
        return Err(ConfigError::Invalid(
            "max_consecutive_failures must be at least 1".into(),
        ));
    }
    if let Some(secs) = cfg.grace_period_secs {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "grace_period_secs must be zero or positive, got {secs}"
            )));
        }
        seconds("grace_period_secs", secs)?;
    }
    if let Some(key) = cfg.sort_by.as_deref() {
        key.parse::<SortKey>().map_err(ConfigError::Invalid)?;
    }
    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(
            level.to_ascii_lowercase().as_str(),
            "off" | "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{level}', expected off, error, warn, info, debug or trace"
            )));
        }
    }
    Ok(())
}

/// First existing default location, if any.
pub fn find_default_config() -> Option<PathBuf> {
    DEFAULT_LOCATIONS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// Parses a config document, choosing the format by file extension
/// (`.json`, `.toml`, otherwise YAML).
pub fn parse_config(path: &Path, content: &str) -> Result<Config, ConfigError> {
    let parse_err = |format: &'static str, message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        format,
        message,
    };
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content).map_err(|e| parse_err("JSON", e.to_string())),
        Some("toml") => toml::from_str(content).map_err(|e| parse_err("TOML", e.to_string())),
        _ => serde_yaml::from_str(content).map_err(|e| parse_err("YAML", e.to_string())),
    }
}

/// Loads `path`, or the first default location when `path` is `None`.
///
/// With no explicit path and no file at any default location, the
/// built-in defaults are returned.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match find_default_config() {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let config = parse_config(&path, &content)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}
