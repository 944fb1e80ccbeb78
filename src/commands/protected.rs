//! Protected command: list the names that can never be terminated.

use herakles_proc_sampler::protected::protected_names;
use herakles_proc_sampler::OperatingSystem;

pub fn command_protected(os: OperatingSystem) -> anyhow::Result<()> {
    let names = protected_names(os);
    println!("🛡️  Protected processes on {}", os);
    println!("==============================");

    if names.is_empty() {
        println!("   (none: termination is unrestricted on this platform)");
        return Ok(());
    }

    for name in names {
        match name.strip_suffix('*') {
            Some(prefix) => println!("   {:<24} (any name starting with '{}')", name, prefix),
            None => println!("   {}", name),
        }
    }
    println!("\n{} entries, matched case-insensitively", names.len());
    Ok(())
}
