//! Check command: validate configuration and the process source.

use std::time::Instant;

use herakles_proc_sampler::config::{validate_effective_config, Config};
use herakles_proc_sampler::SnapshotSource;

pub fn command_check(source: &dyn SnapshotSource, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Herakles Process Sampler - System Check");
    println!("==========================================");

    let mut all_ok = true;

    println!("\n📁 Checking process table...");
    let start = Instant::now();
    match source.list_processes() {
        Ok(samples) if samples.is_empty() => {
            println!("   ❌ Process table is readable but empty");
            all_ok = false;
        }
        Ok(samples) => {
            println!(
                "   ✅ Read {} processes in {:.2}ms",
                samples.len(),
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n📈 Checking system counters...");
    let stats = source.read_system_stats();
    println!(
        "   ✅ CPU {:.1}%, RAM {:.1}%, {} logical cores",
        stats.cpu_percent,
        stats.ram_percent,
        source.core_count()
    );

    println!("\n🔎 Checking process lookup...");
    let me = std::process::id();
    match source.resolve(me) {
        Ok(p) => println!("   ✅ Resolved own process: {} (PID {})", p.name, p.pid),
        Err(e) => {
            println!("   ⚠️  Could not resolve own process: {}", e);
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
