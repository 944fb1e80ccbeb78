//! Protected-process registry.
//!
//! A static, per-OS list of kernel, init and security processes that must never
//! be terminated. Entries match case-insensitively; an entry ending in `*`
//! matches any name with that prefix (kernel threads such as `ksoftirqd/0`).

use ahash::AHashSet as HashSet;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system family the registry and snapshot sources are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystem {
    Linux,
    Windows,
    #[serde(rename = "macos")]
    MacOs,
    Other,
}

impl OperatingSystem {
    /// The operating system this binary was built for.
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            "macos" | "darwin" | "osx" => Ok(Self::MacOs),
            "other" => Ok(Self::Other),
            other => Err(format!(
                "unknown operating system '{other}', expected linux, windows or macos"
            )),
        }
    }
}

const LINUX_PROTECTED: &[&str] = &[
    "systemd",
    "init",
    "kthreadd",
    "ksoftirqd*",
    "kworker*",
    "migration/*",
    "systemd-journald",
    "systemd-udevd",
    "systemd-logind",
    "dbus-daemon",
    "dbus-broker",
    "NetworkManager",
    "accounts-daemon",
    "polkitd",
    "gdm",
    "gdm-x-session",
    "Xorg",
    "X",
    "snapd",
    "rsyslogd",
];

const WINDOWS_PROTECTED: &[&str] = &[
    "System",
    "Registry",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "lsm.exe",
    "smss.exe",
    "winlogon.exe",
    "dwm.exe",
    "svchost.exe",
    "explorer.exe",
    "MsMpEng.exe",
];

const MACOS_PROTECTED: &[&str] = &[
    "kernel_task",
    "launchd",
    "WindowServer",
    "loginwindow",
    "systemstats",
    "UserEventAgent",
    "cfprefsd",
    "distnoted",
    "mds",
    "mds_stores",
    "notifyd",
    "coreservicesd",
];

/// Lowercased lookup tables for one OS.
struct ProtectedSet {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl ProtectedSet {
    fn build(entries: &[&str]) -> Self {
        let mut exact = HashSet::new();
        let mut prefixes = Vec::new();
        for entry in entries {
            let lowered = entry.to_lowercase();
            match lowered.strip_suffix('*') {
                Some(prefix) => prefixes.push(prefix.to_string()),
                None => {
                    exact.insert(lowered);
                }
            }
        }
        Self { exact, prefixes }
    }

    fn contains(&self, name: &str) -> bool {
        let lowered = name.trim().to_lowercase();
        if lowered.is_empty() {
            return false;
        }
        self.exact.contains(&lowered) || self.prefixes.iter().any(|p| lowered.starts_with(p))
    }
}

static LINUX_SET: Lazy<ProtectedSet> = Lazy::new(|| ProtectedSet::build(LINUX_PROTECTED));
static WINDOWS_SET: Lazy<ProtectedSet> = Lazy::new(|| ProtectedSet::build(WINDOWS_PROTECTED));
static MACOS_SET: Lazy<ProtectedSet> = Lazy::new(|| ProtectedSet::build(MACOS_PROTECTED));

/// Returns `true` if `name` may never be terminated on `os`.
pub fn is_protected(name: &str, os: OperatingSystem) -> bool {
    match os {
        OperatingSystem::Linux => LINUX_SET.contains(name),
        OperatingSystem::Windows => WINDOWS_SET.contains(name),
        OperatingSystem::MacOs => MACOS_SET.contains(name),
        OperatingSystem::Other => false,
    }
}

/// Raw registry entries for `os`, patterns included.
pub fn protected_names(os: OperatingSystem) -> &'static [&'static str] {
    match os {
        OperatingSystem::Linux => LINUX_PROTECTED,
        OperatingSystem::Windows => WINDOWS_PROTECTED,
        OperatingSystem::MacOs => MACOS_PROTECTED,
        OperatingSystem::Other => &[],
    }
}
