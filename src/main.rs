//! herakles-proc-sampler - low-latency process sampler with guarded termination.
//!
//! Samples the process table on a fixed interval in the background, ranks
//! the busiest processes and terminates processes on request unless they are
//! protected system processes.

mod cli;
mod commands;

use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info, Level};

use herakles_proc_sampler::config::{load_config, validate_effective_config, Config};
use herakles_proc_sampler::{Monitor, OperatingSystem};

use cli::{Args, Commands, ConfigFormat, LogLevel};
use commands::{
    command_check, command_config, command_generate_replay, command_info, command_kill,
    command_protected, command_snapshot, command_watch, open_source,
};

/// Sets up the tracing subscriber.
///
/// Precedence: `--log-level` > config file > info.
fn setup_logging(config: &Config, args: &Args) {
    let level_name = match args.log_level {
        Some(level) => level.as_str().to_string(),
        None => config
            .log_level
            .as_deref()
            .unwrap_or(LogLevel::Info.as_str())
            .to_ascii_lowercase(),
    };

    let log_level = match level_name.as_str() {
        "off" => None,
        "error" => Some(Level::ERROR),
        "warn" => Some(Level::WARN),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => Some(Level::INFO),
    };

    let Some(log_level) = log_level else {
        return;
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return;
    }

    debug!("Logging initialized with level: {}", level_name);
}

/// Effective configuration: CLI flags > config file > defaults.
fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(interval) = args.interval {
        config.interval_secs = Some(interval);
    }
    if let Some(limit) = args.limit {
        config.display_limit = Some(limit);
    }
    if let Some(top_k) = args.top_k {
        config.top_k = Some(top_k);
    }
    if let Some(sort) = args.sort {
        config.sort_by = Some(herakles_proc_sampler::SortKey::from(sort).as_str().to_string());
    }
    if args.filter.is_some() {
        config.filter = args.filter.clone();
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }

    Ok(config)
}

/// Shows configuration in requested format
fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    if args.check_config {
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        return show_config(&config, args.config_format);
    }

    setup_logging(&config, &args);

    let command = args.command.unwrap_or(Commands::Watch {
        cycles: None,
        stats: false,
    });

    // Commands that neither sample nor need a valid engine configuration.
    match &command {
        Commands::Protected { os } => {
            let os = os.map(OperatingSystem::from).unwrap_or_else(OperatingSystem::current);
            return command_protected(os);
        }
        Commands::Config {
            output,
            format,
            commented,
        } => return command_config(output.clone(), *format, *commented),
        Commands::GenerateReplay {
            output,
            processes,
            frames,
            interval,
            repeat,
        } => return command_generate_replay(output.clone(), *processes, *frames, *interval, *repeat),
        _ => {}
    }

    let source = open_source(args.replay.as_deref())?;

    if let Commands::Check = command {
        return command_check(source.as_ref(), &config);
    }

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    if let Commands::Info = command {
        return command_info(source.as_ref());
    }

    let engine_config = config.engine_config()?;
    let monitor = Monitor::new(Arc::clone(&source), engine_config);
    info!(
        "Starting herakles-proc-sampler on {} ({} cores)",
        monitor.os(),
        source.core_count()
    );

    match command {
        Commands::Watch { cycles, stats } => command_watch(&monitor, cycles, stats).await,
        Commands::Snapshot { cycles, format } => command_snapshot(&monitor, cycles, format).await,
        Commands::Kill { pid, force } => command_kill(&monitor, pid, force).await,
        Commands::Protected { .. }
        | Commands::Config { .. }
        | Commands::GenerateReplay { .. }
        | Commands::Check
        | Commands::Info => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["herakles-proc-sampler"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let args = parse(&["--no-config", "-i", "0.5", "-n", "10", "--sort", "name", "-f", "Nginx"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.interval_secs, Some(0.5));
        assert_eq!(config.display_limit, Some(10));
        assert_eq!(config.sort_by.as_deref(), Some("name"));

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.display_limit, 10);
        assert_eq!(engine.filter.as_deref(), Some("Nginx"));
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampler.yaml");
        std::fs::write(&path, "interval_secs: 5.0\ntop_k: 7\nsort_by: memory\n").unwrap();

        let path_str = path.to_str().unwrap();
        let args = parse(&["-c", path_str, "--top-k", "3"]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.interval_secs, Some(5.0));
        assert_eq!(config.top_k, Some(3));
        assert_eq!(config.sort_by.as_deref(), Some("memory"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let args = parse(&["-c", "/nonexistent/sampler.yaml"]);
        assert!(resolve_config(&args).is_err());
    }
}
