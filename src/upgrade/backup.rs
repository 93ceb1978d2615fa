//! Pre-apply backup archives.

use crate::error::{Error, Result};
use crate::upgrade::exclude::ExcludeSet;
use chrono::{DateTime, Local};
use std::fmt::Display;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Suffixed names tried when backups for the same version land in the same second.
const MAX_NAME_SUFFIX: u32 = 99;

/// File name of the backup taken before installing `version`.
#[must_use]
pub fn backup_file_name(version: &str, at: &DateTime<Local>) -> String {
    format!("pre_update_{version}_{}.zip", at.format("%Y%m%d_%H%M%S"))
}

fn suffixed_name(base: &str, n: u32) -> String {
    match base.strip_suffix(".zip") {
        Some(stem) => format!("{stem}_{n}.zip"),
        None => format!("{base}_{n}"),
    }
}

fn backup_failed(path: &Path, e: impl Display) -> Error {
    Error::BackupFailed(format!("{}: {e}", path.display()))
}

/// Archive the installation root into `backup_dir`.
///
/// Entries are stored under the installation directory's own name, so
/// extracting the archive next to the installation reproduces its layout.
/// The archive is written to a temporary file and only renamed into place
/// once complete. An existing backup is never overwritten: if the
/// timestamped name is taken, `_1`, `_2`, ... is appended.
///
/// # Errors
///
/// Returns [`Error::BackupFailed`] if any part of the tree cannot be read or
/// the archive cannot be written. No partial archive is left behind.
pub fn create_backup(
    install_root: &Path,
    backup_dir: &Path,
    version: &str,
    excludes: &ExcludeSet,
) -> Result<PathBuf> {
    let base = backup_file_name(version, &Local::now());
    let mut archive = write_archive(install_root, backup_dir, excludes)
        .map_err(|e| backup_failed(&backup_dir.join(&base), e))?;

    for n in 0..=MAX_NAME_SUFFIX {
        let target = if n == 0 {
            backup_dir.join(&base)
        } else {
            backup_dir.join(suffixed_name(&base, n))
        };
        match archive.persist_noclobber(&target) {
            Ok(_) => {
                info!("Backed up {} to {}", install_root.display(), target.display());
                return Ok(target);
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} exists, trying the next name", target.display());
                archive = e.file;
            }
            Err(e) => return Err(backup_failed(&target, e.error)),
        }
    }

    Err(backup_failed(
        &backup_dir.join(base),
        "no free backup name for this second",
    ))
}

/// Write the archive to a hidden temporary file in `backup_dir`. It is
/// deleted on drop unless persisted.
fn write_archive(
    install_root: &Path,
    backup_dir: &Path,
    excludes: &ExcludeSet,
) -> std::result::Result<NamedTempFile, Box<dyn std::error::Error + Send + Sync>> {
    fs::create_dir_all(backup_dir)?;
    let root = install_root.canonicalize()?;
    let root_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("app")
        .to_string();

    let tmp = tempfile::Builder::new()
        .prefix(".backup-")
        .suffix(".zip.partial")
        .tempfile_in(backup_dir)?;
    let mut zip = ZipWriter::new(tmp);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.add_directory(format!("{root_name}/"), options)?;

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && excludes.contains(e.file_name())));

    let mut files = 0usize;
    for entry in walker {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&root)?;
        let name = archive_name(&root_name, relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            let size = entry.metadata()?.len();
            zip.start_file(name, options.large_file(size >= u64::from(u32::MAX)))?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
            files += 1;
        } else {
            debug!("Not backing up special file {}", entry.path().display());
        }
    }

    let tmp = zip.finish()?;
    tmp.as_file().sync_all()?;
    debug!("Backup archive holds {files} files");
    Ok(tmp)
}

fn archive_name(root_name: &str, relative: &Path) -> String {
    let mut name = root_name.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}
