//! Command-line interface definition.

use clap::{Parser, Subcommand};
use portable_updater::config::{SettingsLoad, UpdaterConfig, SETTINGS_RELATIVE_PATH};
use portable_updater::context::{platform_key, resolve_current_version, InstallationContext};
use portable_updater::Error;
use std::path::PathBuf;

/// Check for, stage and apply updates of a portable application.
#[derive(Parser, Debug)]
#[command(name = "portable-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Installation root (defaults to the current directory).
    #[arg(long, global = true, env = "PORTABLE_UPDATER_ROOT")]
    pub root: Option<PathBuf>,

    /// Override the release manifest URL.
    #[arg(long, global = true, env = "PORTABLE_UPDATER_MANIFEST_URL")]
    pub manifest_url: Option<String>,

    /// Path to configuration file (defaults to `data/updater.toml` under the root).
    #[arg(long, short, global = true, env = "PORTABLE_UPDATER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level, used when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "PORTABLE_UPDATER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Version of the running application, as reported by the host.
    #[arg(long, global = true, env = "PORTABLE_UPDATER_CURRENT_VERSION")]
    pub current_version: Option<String>,

    /// Platform key used to pick the manifest asset.
    #[arg(long, global = true, env = "PORTABLE_UPDATER_PLATFORM")]
    pub platform: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Updater commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fetch the manifest and stage a newer release if there is one.
    Check,
    /// Install the latest staged release. Run with the application closed.
    Apply,
    /// Show installed version, staged versions and the latest backup.
    Status,
    /// Write the default configuration if none exists yet.
    InitConfig,
}

impl Cli {
    /// Installation root.
    pub fn root(&self) -> color_eyre::Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Settings file path.
    pub fn config_path(&self) -> color_eyre::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(self.root()?.join(SETTINGS_RELATIVE_PATH)),
        }
    }

    /// Read the settings file without resolving it, so the log level can be
    /// known before tracing starts.
    ///
    /// An explicitly named `--config` must exist; the default location may be
    /// missing.
    pub fn load_settings(&self) -> portable_updater::Result<SettingsLoad> {
        let path = self.config_path().map_err(|e| Error::Config(e.to_string()))?;
        let load = UpdaterConfig::load(&path);
        if self.config.is_some() && load == SettingsLoad::Missing {
            return Err(Error::Config(format!(
                "config file {} not found",
                path.display()
            )));
        }
        Ok(load)
    }

    /// Apply CLI overrides to a resolved configuration.
    pub fn apply_overrides(&self, mut config: UpdaterConfig) -> UpdaterConfig {
        if let Some(url) = &self.manifest_url {
            config.manifest_url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        config
    }

    /// Build the installation context from the root and any overrides.
    pub fn context(&self) -> color_eyre::Result<InstallationContext> {
        let root = self.root()?;
        let current_version = resolve_current_version(self.current_version.as_deref(), &root);
        let platform = self.platform.clone().unwrap_or_else(platform_key);
        Ok(InstallationContext::new(root, platform, current_version))
    }
}
