//! Target-layout detection: where binaries, completion scripts and installer
//! state live.

use std::path::{Path, PathBuf};

/// Detect the install prefix, `TARPON_PREFIX` overriding the default
/// `~/.local`.
pub fn detect_prefix() -> PathBuf {
    if let Ok(prefix) = std::env::var("TARPON_PREFIX") {
        return PathBuf::from(prefix);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".local")
}

/// Caller-configured target directories for one install operation.
#[derive(Debug, Clone)]
pub struct InstallDirs {
    /// Where the executable is published.
    pub bin_dir: PathBuf,
    /// Where completion scripts are published (opt-in).
    pub completion_dir: PathBuf,
    /// Records, locks and staging scratch space.
    pub state_dir: PathBuf,
}

impl InstallDirs {
    pub fn from_prefix(prefix: &Path) -> Self {
        Self {
            bin_dir: prefix.join("bin"),
            completion_dir: prefix.join("share/bash-completion/completions"),
            state_dir: prefix.join("var/tarpon"),
        }
    }
}
