//! Advisory lock serializing check and apply on one installation.
//!
//! The lock is a file created with exclusive-create semantics, so a second
//! updater process fails fast instead of racing. It is removed on drop. A
//! lock left behind by a killed process must be deleted by hand; its
//! contents name the pid that held it.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name inside `updates/`.
pub const LOCK_FILE: &str = ".update.lock";

/// Held update lock.
#[derive(Debug)]
pub struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    /// Acquire the lock in `updates_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockHeld`] if another process holds the lock, or an
    /// I/O error if the lock file cannot be created.
    pub fn acquire(updates_dir: &Path) -> Result<Self> {
        fs::create_dir_all(updates_dir)?;
        let path = updates_dir.join(LOCK_FILE);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                warn!(
                    "Update lock {} already held ({})",
                    path.display(),
                    holder.trim()
                );
                return Err(Error::LockHeld(path));
            }
            Err(e) => return Err(e.into()),
        };

        let lock = Self { path };
        writeln!(
            file,
            "pid={} since={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        debug!("Acquired update lock {}", lock.path.display());
        Ok(lock)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release update lock {}: {e}", self.path.display());
        } else {
            debug!("Released update lock {}", self.path.display());
        }
    }
}
