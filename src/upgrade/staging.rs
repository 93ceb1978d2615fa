//! On-disk staging store under `<installRoot>/updates/`.
//!
//! ```text
//! updates/
//!   cache/update_<version>.zip          downloaded packages
//!   staging/<version>/                  extracted tree + _update_marker.json
//!   staging/.<version>.partial-XXXX/    extraction in progress
//!   backup/pre_update_<version>_<ts>.zip
//! ```
//!
//! A staging directory only counts as staged when it carries a readable
//! marker and at least one file. Extraction happens in a hidden sibling and
//! is renamed into place once complete, so a crash never leaves a
//! half-populated `<version>/` behind.

use crate::error::{Error, Result};
use crate::upgrade::extract::has_any_file;
use crate::upgrade::manifest::{Asset, Manifest};
use crate::upgrade::version::compare_versions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Marker file written into every completed staging directory.
pub const MARKER_FILE: &str = "_update_marker.json";

/// Provenance of a staged version; the contract between check and apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRecord {
    /// Staged version.
    pub version: String,
    /// Release tag from the manifest.
    pub release_tag: String,
    /// Release channel from the manifest.
    pub channel: String,
    /// URL the package was downloaded from.
    pub download_url: String,
    /// SHA-256 of the package that was extracted.
    pub sha256: Option<String>,
    /// Whether the package matched a published checksum.
    #[serde(default)]
    pub verified: bool,
    /// Unix timestamp of staging.
    pub staged_at: i64,
}

impl StagingRecord {
    /// Record for `asset` of `manifest`, stamped now.
    #[must_use]
    pub fn new(manifest: &Manifest, asset: &Asset, sha256: Option<String>) -> Self {
        Self {
            version: manifest.version.clone(),
            release_tag: manifest.release_tag.clone(),
            channel: manifest.channel.to_string(),
            download_url: asset.url.clone(),
            sha256,
            verified: false,
            staged_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Outcome of reading a marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerRead {
    /// Marker parsed.
    Present(StagingRecord),
    /// No marker file.
    Missing,
    /// Marker exists but could not be read or parsed.
    Malformed(String),
}

impl MarkerRead {
    /// The record, if one was read.
    #[must_use]
    pub fn record(self) -> Option<StagingRecord> {
        match self {
            Self::Present(record) => Some(record),
            Self::Missing | Self::Malformed(_) => None,
        }
    }
}

/// Directory layout and staging bookkeeping.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    /// Store rooted at `updates_dir` (normally `<installRoot>/updates`).
    #[must_use]
    pub fn new(updates_dir: PathBuf) -> Self {
        Self { root: updates_dir }
    }

    /// The `updates/` directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Downloaded package cache.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Parent of all staging directories.
    #[must_use]
    pub fn staging_root(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Pre-apply backups.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backup")
    }

    /// Create `cache/`, `staging/` and `backup/` if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [self.cache_dir(), self.staging_root(), self.backup_dir()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Staging directory for `version`.
    #[must_use]
    pub fn staging_dir_for(&self, version: &str) -> PathBuf {
        self.staging_root().join(version)
    }

    /// Cache path for the package of `version`.
    #[must_use]
    pub fn cache_zip_path_for(&self, version: &str) -> PathBuf {
        self.cache_dir().join(format!("update_{version}.zip"))
    }

    /// Names of all staging directories, oldest version first.
    ///
    /// Hidden in-progress directories are ignored. Ordering is numeric for
    /// dotted versions (`0.9.0` before `0.10.0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be listed.
    pub fn staged_versions(&self) -> Result<Vec<String>> {
        let staging_root = self.staging_root();
        let entries = match fs::read_dir(&staging_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Ignoring non UTF-8 staging entry {:?}", entry.file_name());
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            versions.push(name);
        }

        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }

    /// Highest staged version, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory cannot be listed.
    pub fn latest_staged_version(&self) -> Result<Option<String>> {
        Ok(self.staged_versions()?.pop())
    }

    /// Whether `version` is fully staged: marker readable and tree non-empty.
    #[must_use]
    pub fn is_staged(&self, version: &str) -> bool {
        let dir = self.staging_dir_for(version);
        dir.is_dir()
            && matches!(Self::read_marker(&dir), MarkerRead::Present(_))
            && has_any_file(&dir)
    }

    /// Write the marker into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be serialized or written.
    pub fn write_marker(dir: &Path, record: &StagingRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        fs::write(dir.join(MARKER_FILE), json)?;
        Ok(())
    }

    /// Read the marker from `dir`. Never fails; absence and corruption are
    /// reported as distinct outcomes.
    #[must_use]
    pub fn read_marker(dir: &Path) -> MarkerRead {
        let path = dir.join(MARKER_FILE);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MarkerRead::Missing,
            Err(e) => return MarkerRead::Malformed(e.to_string()),
        };
        match serde_json::from_slice(&content) {
            Ok(record) => MarkerRead::Present(record),
            Err(e) => MarkerRead::Malformed(e.to_string()),
        }
    }

    /// Fresh hidden directory to extract `version` into. Removed on drop
    /// unless committed. Partial directories left by an interrupted run are
    /// swept first; callers hold the update lock, so none of them is live.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn begin_staging(&self, version: &str) -> Result<TempDir> {
        let staging_root = self.staging_root();
        fs::create_dir_all(&staging_root)?;
        self.sweep_partials();
        let partial = tempfile::Builder::new()
            .prefix(&format!(".{version}.partial-"))
            .tempdir_in(&staging_root)?;
        debug!("Extracting into {}", partial.path().display());
        Ok(partial)
    }

    /// Remove leftover `.<version>.partial-*` directories. Failures are
    /// logged and ignored.
    fn sweep_partials(&self) {
        let Ok(entries) = fs::read_dir(self.staging_root()) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_partial = name
                .to_str()
                .is_some_and(|n| n.starts_with('.') && n.contains(".partial-"));
            if !is_partial || !entry.path().is_dir() {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => debug!("Removed stale partial {}", entry.path().display()),
                Err(e) => warn!(
                    "Could not remove stale partial {}: {e}",
                    entry.path().display()
                ),
            }
        }
    }

    /// Move a completed extraction into `staging/<version>/`, replacing any
    /// invalid leftover there.
    ///
    /// # Errors
    ///
    /// Returns an error if the old directory cannot be removed or the rename
    /// fails.
    pub fn commit_staging(&self, partial: TempDir, version: &str) -> Result<PathBuf> {
        let target = self.staging_dir_for(version);
        if target.exists() {
            warn!("Replacing incomplete staging directory {}", target.display());
            fs::remove_dir_all(&target)?;
        }
        fs::rename(partial.path(), &target)?;
        // The TempDir now points at a path that no longer exists; dropping it
        // is a no-op.
        drop(partial);
        info!("Staged {version} at {}", target.display());
        Ok(target)
    }

    /// Remove the staging directory of `version` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove_staged(&self, version: &str) -> Result<()> {
        let dir = self.staging_dir_for(version);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Removed staging directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Backup archives, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup directory cannot be listed.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(self.backup_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "zip") {
                backups.push(path);
            }
        }
        backups.sort_by_key(|path| fs::metadata(path).and_then(|m| m.modified()).ok());
        Ok(backups)
    }
}
