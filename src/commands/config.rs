//! Config command: write a default configuration file.

use std::fs;
use std::path::PathBuf;

use herakles_proc_sampler::config::Config;

use crate::cli::ConfigFormat;

pub fn command_config(output: Option<PathBuf>, format: ConfigFormat, commented: bool) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("herakles-proc-sampler.yaml"));

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(&config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Prepends a commented key reference to YAML output.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Process Sampler Configuration
# ======================================
#
# Sampling Loop
# -------------
# interval_secs: 2.0             # Seconds between cycles
# display_limit: 100             # Processes published per snapshot
# max_consecutive_failures: 3    # Failed cycles in a row before sampling stops
#
# Differential Cache
# ------------------
# top_k: 50                      # Busiest processes refreshed every cycle (0 = all)
# full_refresh_every: 5          # Every n-th cycle refreshes every process
#
# View
# ----
# sort_by: "cpu"                 # cpu, memory, pid, name
# filter: "nginx"                # Case-insensitive name substring
#
# Termination
# -----------
# grace_period_secs: 3.0         # Wait before a graceful kill escalates
#
# Logging
# -------
# log_level: "info"              # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
