//! Configuration for portable-updater.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Default location of the settings file, relative to the installation root.
pub const SETTINGS_RELATIVE_PATH: &str = "data/updater.toml";

/// Updater configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Well-known URL of the release manifest.
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Total timeout for the manifest request, in seconds.
    #[serde(default = "default_manifest_timeout")]
    pub manifest_timeout_secs: u64,

    /// Per-read timeout while streaming a package, in seconds.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// TCP/TLS connect timeout, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Packages smaller than this are rejected before verification.
    /// Zero disables the guard.
    #[serde(default = "default_min_package_bytes")]
    pub min_package_bytes: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Additional top-level names never removed or replaced by apply.
    #[serde(default)]
    pub extra_excludes: Vec<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            manifest_timeout_secs: default_manifest_timeout(),
            download_timeout_secs: default_download_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            min_package_bytes: default_min_package_bytes(),
            user_agent: default_user_agent(),
            log_level: default_log_level(),
            extra_excludes: Vec::new(),
        }
    }
}

fn default_manifest_url() -> String {
    "https://github.com/dirvine/portable-updater/releases/latest/download/manifest.json"
        .to_string()
}

const fn default_manifest_timeout() -> u64 {
    10
}

const fn default_download_timeout() -> u64 {
    30
}

const fn default_connect_timeout() -> u64 {
    10
}

const fn default_min_package_bytes() -> u64 {
    1024 * 1024 // 1 MiB
}

fn default_user_agent() -> String {
    format!("portable-updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Outcome of reading the settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsLoad {
    /// The file was read and parsed.
    Loaded(UpdaterConfig),
    /// No settings file exists yet.
    Missing,
    /// The file exists but could not be read or parsed.
    Malformed(String),
}

impl SettingsLoad {
    /// Resolve to a usable configuration, falling back to defaults.
    #[must_use]
    pub fn into_config(self) -> UpdaterConfig {
        match self {
            Self::Loaded(config) => config,
            Self::Missing => {
                debug!("No settings file, using defaults");
                UpdaterConfig::default()
            }
            Self::Malformed(reason) => {
                warn!("Ignoring malformed settings file ({reason}), using defaults");
                UpdaterConfig::default()
            }
        }
    }
}

impl UpdaterConfig {
    /// Manifest request timeout.
    #[must_use]
    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    /// Per-read download timeout.
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read the settings file, distinguishing a missing file from a broken one.
    #[must_use]
    pub fn load(path: &Path) -> SettingsLoad {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SettingsLoad::Missing,
            Err(e) => return SettingsLoad::Malformed(format!("{}: {e}", path.display())),
        };

        match toml::from_str(&content) {
            Ok(config) => SettingsLoad::Loaded(config),
            Err(e) => SettingsLoad::Malformed(format!("{}: {e}", path.display())),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
