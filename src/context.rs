//! Installation context resolved once at process start.
//!
//! Every component receives an [`InstallationContext`] instead of deriving
//! paths or versions from the process environment on its own.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Version reported when neither the host nor `version.json` provides one.
pub const FALLBACK_VERSION: &str = "0.0.0";

/// Name of the version file in the installation root.
pub const VERSION_FILE: &str = "version.json";

/// Paths and identity of the installation being updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationContext {
    install_root: PathBuf,
    platform: String,
    current_version: String,
}

#[derive(Deserialize)]
struct VersionFile {
    version: String,
}

impl InstallationContext {
    /// Create a context from explicit values.
    #[must_use]
    pub fn new(install_root: PathBuf, platform: String, current_version: String) -> Self {
        Self {
            install_root,
            platform,
            current_version,
        }
    }

    /// Build a context for `install_root`, detecting the platform and
    /// resolving the current version.
    #[must_use]
    pub fn detect(install_root: PathBuf, host_version: Option<&str>) -> Self {
        let current_version = resolve_current_version(host_version, &install_root);
        Self::new(install_root, platform_key(), current_version)
    }

    /// Installation root directory.
    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Platform key used to select a manifest asset.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Version of the running application.
    #[must_use]
    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// The updater's own state directory.
    #[must_use]
    pub fn updates_dir(&self) -> PathBuf {
        self.install_root.join("updates")
    }
}

/// Platform key for this machine: `windows`, `linux`, `macos`, or the
/// lowercase OS name elsewhere.
#[must_use]
pub fn platform_key() -> String {
    match std::env::consts::OS {
        "windows" => "windows".to_string(),
        "linux" => "linux".to_string(),
        "macos" => "macos".to_string(),
        other => other.to_lowercase(),
    }
}

/// Resolve the running version: host-supplied, then `version.json`, then
/// [`FALLBACK_VERSION`].
#[must_use]
pub fn resolve_current_version(host_version: Option<&str>, install_root: &Path) -> String {
    if let Some(version) = host_version.map(str::trim).filter(|v| !v.is_empty()) {
        return version.to_string();
    }

    let path = install_root.join(VERSION_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<VersionFile>(&content) {
            Ok(file) if !file.version.trim().is_empty() => {
                debug!("Current version {} from {}", file.version, path.display());
                return file.version.trim().to_string();
            }
            Ok(_) => warn!("{} has a blank version", path.display()),
            Err(e) => warn!("Ignoring malformed {}: {e}", path.display()),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not read {}: {e}", path.display()),
    }

    FALLBACK_VERSION.to_string()
}
