//! Apply: swap the installation's managed files for a staged release.
//!
//! Must run while the application is closed. The sequence is
//! backup, remove managed entries, copy staged entries. The backup always
//! completes before anything is removed. Removal and copy are not atomic;
//! an interrupted apply is recovered from the backup archive.

use crate::config::UpdaterConfig;
use crate::context::{InstallationContext, VERSION_FILE};
use crate::error::{Error, Result};
use crate::event::{emit, UpdateEvent, UpdateEventsSender};
use crate::upgrade::backup::create_backup;
use crate::upgrade::exclude::ExcludeSet;
use crate::upgrade::extract::{find_staged_root, has_any_file, NOISE_ENTRIES};
use crate::upgrade::lock::UpdateLock;
use crate::upgrade::staging::{MarkerRead, StagingRecord, StagingStore};
use crate::upgrade::version::compare_versions;
use std::cmp::Ordering;
use std::fs::{self, DirEntry};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// Installed version.
    pub version: String,
    /// Pre-apply backup archive.
    pub backup: PathBuf,
    /// Marker contents, if the staging directory had a readable one.
    pub provenance: Option<StagingRecord>,
    /// Top-level entries removed from the installation.
    pub removed: usize,
    /// Files copied from the staged tree.
    pub copied: usize,
    /// Entries that could not be removed and were left in place.
    pub skipped: Vec<PathBuf>,
}

/// Installs staged releases.
pub struct UpdateApplier {
    ctx: InstallationContext,
    store: StagingStore,
    excludes: ExcludeSet,
    events: Option<UpdateEventsSender>,
    remove: fn(&DirEntry) -> io::Result<()>,
}

impl UpdateApplier {
    /// Create an applier for `ctx`. Extra protected names come from `config`.
    #[must_use]
    pub fn new(ctx: InstallationContext, config: &UpdaterConfig) -> Self {
        let store = StagingStore::new(ctx.updates_dir());
        let excludes = ExcludeSet::default().with_extra(&config.extra_excludes);
        Self {
            ctx,
            store,
            excludes,
            events: None,
            remove: remove_entry,
        }
    }

    /// Publish progress on `events`.
    #[must_use]
    pub fn with_events(mut self, events: UpdateEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// The staging store this applier reads from.
    #[must_use]
    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    /// Apply the highest staged version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStagedUpdate`] if nothing is staged,
    /// [`Error::BackupFailed`] (with the installation untouched) if the
    /// backup cannot be written, or an I/O error if copying fails.
    pub fn apply(&self) -> Result<ApplyReport> {
        let _lock = UpdateLock::acquire(self.store.root())?;
        let version = self
            .store
            .latest_staged_version()?
            .ok_or(Error::NoStagedUpdate)?;
        self.report(self.apply_locked(&version))
    }

    /// Apply a specific staged version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StagingMissing`] if `version` has no staging
    /// directory, otherwise as [`UpdateApplier::apply`].
    pub fn apply_staged(&self, version: &str) -> Result<ApplyReport> {
        let _lock = UpdateLock::acquire(self.store.root())?;
        self.report(self.apply_locked(version))
    }

    fn report(&self, result: Result<ApplyReport>) -> Result<ApplyReport> {
        if let Err(e) = &result {
            emit(
                self.events.as_ref(),
                UpdateEvent::Error {
                    message: e.to_string(),
                },
            );
        }
        result
    }

    fn apply_locked(&self, version: &str) -> Result<ApplyReport> {
        let staging_dir = self.store.staging_dir_for(version);
        if !staging_dir.is_dir() {
            return Err(Error::StagingMissing(staging_dir));
        }

        let provenance = match StagingStore::read_marker(&staging_dir) {
            MarkerRead::Present(record) => Some(record),
            MarkerRead::Missing => {
                warn!("No marker in {}; provenance unknown", staging_dir.display());
                None
            }
            MarkerRead::Malformed(reason) => {
                warn!(
                    "Unreadable marker in {} ({reason}); provenance unknown",
                    staging_dir.display()
                );
                None
            }
        };

        if !has_any_file(&staging_dir) {
            return Err(Error::EmptyPackage(format!(
                "{} contains no files",
                staging_dir.display()
            )));
        }

        let package_root = find_staged_root(&staging_dir)?;
        let install_root = self.ctx.install_root();
        info!(
            "Applying {version} from {} to {} (installed {})",
            package_root.display(),
            install_root.display(),
            self.ctx.current_version()
        );
        emit(
            self.events.as_ref(),
            UpdateEvent::ApplyStarted {
                version: version.to_string(),
            },
        );

        let backup = create_backup(
            install_root,
            &self.store.backup_dir(),
            version,
            &ExcludeSet::for_backup(),
        )?;
        emit(
            self.events.as_ref(),
            UpdateEvent::BackupCreated {
                path: backup.clone(),
            },
        );

        let (removed, skipped) = self.remove_managed()?;
        let copied = self.copy_staged(&package_root)?;
        self.write_version_file(version, &package_root)?;
        self.consume_staged(version);

        info!(
            "Applied {version}: removed {removed}, copied {copied} files, {} left in place; restart required",
            skipped.len()
        );
        emit(
            self.events.as_ref(),
            UpdateEvent::Applied {
                version: version.to_string(),
            },
        );

        Ok(ApplyReport {
            version: version.to_string(),
            backup,
            provenance,
            removed,
            copied,
            skipped,
        })
    }

    /// Delete every unprotected top-level entry. Failures are logged and
    /// skipped.
    fn remove_managed(&self) -> Result<(usize, Vec<PathBuf>)> {
        let mut removed = 0usize;
        let mut skipped = Vec::new();

        for entry in fs::read_dir(self.ctx.install_root())? {
            let entry = entry?;
            if self.excludes.contains(&entry.file_name()) {
                continue;
            }

            let path = entry.path();
            match (self.remove)(&entry) {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) => {
                    warn!("Could not remove {}: {e}; leaving it in place", path.display());
                    emit(
                        self.events.as_ref(),
                        UpdateEvent::EntrySkipped {
                            path: path.clone(),
                            reason: e.to_string(),
                        },
                    );
                    skipped.push(path);
                }
            }
        }

        Ok((removed, skipped))
    }

    /// Copy every unprotected top-level entry of the package root into the
    /// installation. Directories replace their counterpart wholesale.
    fn copy_staged(&self, package_root: &Path) -> Result<usize> {
        let install_root = self.ctx.install_root();
        let mut copied = 0usize;

        for entry in fs::read_dir(package_root)? {
            let entry = entry?;
            let name = entry.file_name();
            if self.excludes.contains(&name) || NOISE_ENTRIES.iter().any(|n| name == *n) {
                debug!("Not installing protected or noise entry {:?}", name);
                continue;
            }

            let src = entry.path();
            let dest = install_root.join(&name);
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if let Ok(meta) = fs::symlink_metadata(&dest) {
                    if meta.is_dir() {
                        fs::remove_dir_all(&dest)?;
                    } else {
                        fs::remove_file(&dest)?;
                    }
                }
                copied += copy_tree(&src, &dest)?;
            } else if file_type.is_file() {
                if fs::symlink_metadata(&dest).is_ok_and(|m| m.is_dir()) {
                    fs::remove_dir_all(&dest)?;
                }
                fs::copy(&src, &dest)?;
                copied += 1;
            } else {
                debug!("Not installing special file {}", src.display());
            }
        }

        Ok(copied)
    }

    fn write_version_file(&self, version: &str, package_root: &Path) -> Result<()> {
        if package_root.join(VERSION_FILE).exists() {
            return Ok(());
        }
        let content = serde_json::json!({ "version": version }).to_string();
        fs::write(self.ctx.install_root().join(VERSION_FILE), content)?;
        Ok(())
    }

    /// Drop staging directories at or below the applied version so the same
    /// tree is not applied twice.
    fn consume_staged(&self, applied: &str) {
        let versions = match self.store.staged_versions() {
            Ok(versions) => versions,
            Err(e) => {
                warn!("Could not list staged versions: {e}");
                return;
            }
        };

        for version in versions {
            if compare_versions(&version, applied) != Ordering::Greater {
                if let Err(e) = self.store.remove_staged(&version) {
                    warn!("Could not remove staged {version}: {e}");
                }
            }
        }
    }
}

fn remove_entry(entry: &DirEntry) -> io::Result<()> {
    let file_type = entry.file_type()?;
    if file_type.is_dir() {
        fs::remove_dir_all(entry.path())
    } else {
        fs::remove_file(entry.path())
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0usize;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            debug!("Not installing special file {}", entry.path().display());
        }
    }
    Ok(copied)
}
