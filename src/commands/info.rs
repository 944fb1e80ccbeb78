//! Info command: static system information.

use chrono::Utc;
use std::time::Duration;

use herakles_proc_sampler::format::{format_bytes, format_uptime};
use herakles_proc_sampler::SnapshotSource;

pub fn command_info(source: &dyn SnapshotSource) -> anyhow::Result<()> {
    let info = source.system_info();

    println!("🖥️  System Information");
    println!("=====================");
    println!("   OS:            {} ({})", info.os_version, info.os);
    match info.cpu_physical {
        Some(physical) => println!("   CPU cores:     {} logical, {} physical", info.cpu_logical, physical),
        None => println!("   CPU cores:     {} logical", info.cpu_logical),
    }
    println!(
        "   Memory:        {} total, {} available",
        format_bytes(info.ram_total),
        format_bytes(info.ram_available)
    );
    if let Some(boot) = info.boot_time {
        let uptime = (Utc::now() - boot).to_std().unwrap_or(Duration::ZERO);
        println!(
            "   Booted:        {} (up {})",
            boot.format("%Y-%m-%d %H:%M:%S UTC"),
            format_uptime(uptime)
        );
    }
    Ok(())
}
