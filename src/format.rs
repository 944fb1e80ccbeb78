//! Human-readable formatting helpers.

use std::time::Duration;

use crate::protected::OperatingSystem;

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Formats a byte count with binary multiples, e.g. `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// `Xd Yh Zm`, dropping leading zero units.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// What to tell a user whose termination request hit "access denied".
pub fn permission_hint(os: OperatingSystem) -> &'static str {
    match os {
        OperatingSystem::Linux => "Try again with sudo, or as the user that owns the process.",
        OperatingSystem::MacOs => "Try again with sudo; SIP-protected processes cannot be terminated at all.",
        OperatingSystem::Windows => "Run the terminal as Administrator and try again.",
        OperatingSystem::Other => "Retry with elevated privileges.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MB");
        assert_eq!(format_bytes(3 * 1024u64.pow(5)), "3.0 PB");
        assert_eq!(format_bytes(u64::MAX), "16384.0 PB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(59)), "0m");
        assert_eq!(format_uptime(Duration::from_secs(3_720)), "1h 2m");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400 + 5 * 3_600 + 60)), "2d 5h 1m");
    }

    #[test]
    fn test_permission_hint_per_os() {
        assert!(permission_hint(OperatingSystem::Linux).contains("sudo"));
        assert!(permission_hint(OperatingSystem::Windows).contains("Administrator"));
    }
}
