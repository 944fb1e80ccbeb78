//! Watch command: live table of the busiest processes.

use anyhow::bail;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use herakles_proc_sampler::Monitor;

use super::render_snapshot_table;

/// How often the consumer polls the mailbox.
const CONSUMER_TICK: Duration = Duration::from_millis(100);

pub async fn command_watch(monitor: &Monitor, cycles: Option<u64>, show_stats: bool) -> anyhow::Result<()> {
    let interval = monitor.config().interval;
    monitor.start(interval);
    info!("Watching processes every {:?} (Ctrl+C to stop)", interval);

    let mut ticker = tokio::time::interval(CONSUMER_TICK);
    let mut printed = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }

        if let Some(snapshot) = monitor.try_take_snapshot() {
            println!("{}", render_snapshot_table(&snapshot));
            if show_stats {
                println!("{}", monitor.cycle_stats().render_table());
            }
            printed += 1;
            if cycles.is_some_and(|max| printed >= max) {
                break;
            }
        }

        let status = monitor.status();
        if let Some(fatal) = status.fatal {
            monitor.stop().await;
            bail!("Sampling stopped: {fatal}");
        }
    }

    monitor.stop().await;
    Ok(())
}
