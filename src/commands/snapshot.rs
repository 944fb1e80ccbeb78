//! Snapshot command: sample a few cycles and print the last result.

use anyhow::{bail, Context};
use std::time::Duration;
use tokio::sync::watch;

use herakles_proc_sampler::{EngineStatus, Monitor};

use super::render_snapshot_table;
use crate::cli::OutputFormat;

/// Runs until `cycles` snapshots were published, then stops the monitor.
async fn wait_for_cycles(status: &mut watch::Receiver<EngineStatus>, cycles: u64) -> anyhow::Result<()> {
    loop {
        {
            let current = status.borrow_and_update();
            if let Some(fatal) = &current.fatal {
                bail!("Sampling stopped: {fatal}");
            }
            if current.cycles >= cycles {
                return Ok(());
            }
        }
        status
            .changed()
            .await
            .context("sampling engine went away")?;
    }
}

pub async fn command_snapshot(monitor: &Monitor, cycles: u64, format: OutputFormat) -> anyhow::Result<()> {
    let cycles = cycles.max(1);
    let mut status = monitor.subscribe_status();
    let interval = if cycles == 1 {
        Duration::ZERO
    } else {
        monitor.config().interval
    };
    monitor.start(interval);

    let result = wait_for_cycles(&mut status, cycles).await;
    monitor.stop().await;
    result?;

    let snapshot = monitor
        .latest_snapshot()
        .context("no snapshot was published")?;

    let output = match format {
        OutputFormat::Table => render_snapshot_table(&snapshot),
        OutputFormat::Json => serde_json::to_string_pretty(snapshot.as_ref())?,
        OutputFormat::Yaml => serde_yaml::to_string(snapshot.as_ref())?,
        OutputFormat::Toml => toml::to_string_pretty(snapshot.as_ref())?,
    };
    println!("{output}");
    Ok(())
}
