//! Path-traversal-safe package extraction.
//!
//! Nothing in a package may be written outside the destination directory.
//! Entries with absolute paths, `..` segments, drive prefixes, or whose
//! resolved location escapes the destination are skipped and reported; they
//! never abort the extraction.

use crate::error::{Error, Result};
use crate::upgrade::staging::MARKER_FILE;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

/// Top-level names that packaging tools add and that never count as content.
pub const NOISE_ENTRIES: &[&str] = &[
    MARKER_FILE,
    "__MACOSX",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
];

/// Supported package formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// ZIP archive.
    Zip,
    /// Gzip-compressed tarball.
    TarGz,
}

/// Summary of an extraction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    /// Number of regular files written.
    pub files: usize,
    /// Entry names that were refused, with the reason.
    pub skipped: Vec<(String, String)>,
}

impl ExtractReport {
    fn skip(&mut self, name: &str, reason: &str) {
        warn!("Skipping archive entry '{name}': {reason}");
        self.skipped.push((name.to_string(), reason.to_string()));
    }
}

/// Identify the archive format from its leading bytes.
///
/// # Errors
///
/// Returns [`Error::ExtractionFailed`] for an unrecognised format.
pub fn detect_format(archive: &Path) -> Result<ArchiveFormat> {
    let mut magic = [0u8; 4];
    let mut file = File::open(archive)?;
    let n = file.read(&mut magic)?;

    match &magic[..n] {
        [b'P', b'K', 3 | 5 | 7, 4 | 6 | 8] => Ok(ArchiveFormat::Zip),
        [0x1f, 0x8b, ..] => Ok(ArchiveFormat::TarGz),
        _ => Err(Error::ExtractionFailed(format!(
            "{} is neither a zip archive nor a gzip tarball",
            archive.display()
        ))),
    }
}

/// Extract `archive` into `dest`, refusing any entry that would land
/// outside it.
///
/// # Errors
///
/// Returns [`Error::ExtractionFailed`] if the archive is unreadable or
/// corrupt, or an I/O error if the destination cannot be written.
pub fn safe_extract(archive: &Path, dest: &Path) -> Result<ExtractReport> {
    fs::create_dir_all(dest)?;
    let dest_root = dest.canonicalize()?;

    let report = match detect_format(archive)? {
        ArchiveFormat::Zip => extract_zip(archive, &dest_root)?,
        ArchiveFormat::TarGz => extract_tar_gz(archive, &dest_root)?,
    };

    debug!(
        "Extracted {} files from {} ({} skipped)",
        report.files,
        archive.display(),
        report.skipped.len()
    );
    Ok(report)
}

fn extract_zip(archive: &Path, dest_root: &Path) -> Result<ExtractReport> {
    let archive_name = archive.display().to_string();
    let file = File::open(archive).map_err(entry_failed(&archive_name))?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        Error::ExtractionFailed(format!("failed to read zip {}: {e}", archive.display()))
    })?;
    let mut report = ExtractReport::default();

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::ExtractionFailed(format!("failed to read zip entry {i}: {e}")))?;
        let name = entry.name().to_string();

        let Some(relative) = sanitize_entry_name(&name) else {
            report.skip(&name, "unsafe path");
            continue;
        };
        let Some(target) = contained_target(dest_root, &relative).map_err(entry_failed(&name))?
        else {
            report.skip(&name, "resolves outside destination");
            continue;
        };

        if entry.is_dir() {
            if !create_dir_within(dest_root, &target).map_err(entry_failed(&name))? {
                report.skip(&name, "resolves outside destination");
            }
            continue;
        }

        if entry.unix_mode().is_some_and(is_symlink_mode) {
            report.skip(&name, "symbolic link");
            continue;
        }

        if !prepare_parent(dest_root, &target).map_err(entry_failed(&name))? {
            report.skip(&name, "resolves outside destination");
            continue;
        }

        let mut out = File::create(&target).map_err(entry_failed(&name))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| Error::ExtractionFailed(format!("failed to extract '{name}': {e}")))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode((mode & 0o777) | 0o600))
                .map_err(entry_failed(&name))?;
        }

        report.files += 1;
    }

    Ok(report)
}

fn extract_tar_gz(archive: &Path, dest_root: &Path) -> Result<ExtractReport> {
    let archive_name = archive.display().to_string();
    let gz = GzDecoder::new(File::open(archive).map_err(entry_failed(&archive_name))?);
    let mut tar = tar::Archive::new(gz);
    let mut report = ExtractReport::default();

    let entries = tar
        .entries()
        .map_err(|e| Error::ExtractionFailed(format!("failed to read tar entries: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::ExtractionFailed(format!("failed to read tar entry: {e}")))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

        let Some(relative) = sanitize_entry_name(&name) else {
            report.skip(&name, "unsafe path");
            continue;
        };
        let Some(target) = contained_target(dest_root, &relative).map_err(entry_failed(&name))?
        else {
            report.skip(&name, "resolves outside destination");
            continue;
        };

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                if !create_dir_within(dest_root, &target).map_err(entry_failed(&name))? {
                    report.skip(&name, "resolves outside destination");
                }
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if !prepare_parent(dest_root, &target).map_err(entry_failed(&name))? {
                    report.skip(&name, "resolves outside destination");
                    continue;
                }
                entry.unpack(&target).map_err(|e| {
                    Error::ExtractionFailed(format!("failed to extract '{name}': {e}"))
                })?;
                report.files += 1;
            }
            other => report.skip(&name, &format!("unsupported entry type {other:?}")),
        }
    }

    Ok(report)
}

/// Turn a raw archive entry name into a relative path made only of normal
/// components, or `None` if the name is unsafe.
///
/// Both `/` and `\` are treated as separators so Windows-style names cannot
/// smuggle `..` past the check.
#[must_use]
pub fn sanitize_entry_name(raw: &str) -> Option<PathBuf> {
    if raw.starts_with('/') || raw.starts_with('\\') || raw.contains('\0') {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains(':') => return None,
            s => relative.push(s),
        }
    }

    // Catch any platform-specific prefix the split let through.
    if relative.as_os_str().is_empty()
        || relative.is_absolute()
        || !relative.components().all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(relative)
}

/// Join `relative` onto `dest_root` and confirm the deepest existing
/// ancestor still resolves inside it.
fn contained_target(dest_root: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let target = dest_root.join(relative);
    if target == dest_root {
        return Ok(None);
    }

    if fs::symlink_metadata(&target).is_ok_and(|m| m.file_type().is_symlink()) {
        return Ok(None);
    }

    let mut ancestor = target.as_path();
    while let Some(parent) = ancestor.parent() {
        if parent.exists() {
            let resolved = parent.canonicalize()?;
            return Ok(resolved.starts_with(dest_root).then_some(target));
        }
        ancestor = parent;
    }
    Ok(None)
}

/// Report a filesystem failure on `name` as an extraction failure.
fn entry_failed<E: Into<Error>>(name: &str) -> impl Fn(E) -> Error + '_ {
    move |e| match e.into() {
        Error::Io(e) => Error::ExtractionFailed(format!("'{name}': {e}")),
        other => other,
    }
}

fn create_dir_within(dest_root: &Path, dir: &Path) -> Result<bool> {
    fs::create_dir_all(dir)?;
    Ok(dir.canonicalize()?.starts_with(dest_root))
}

fn prepare_parent(dest_root: &Path, target: &Path) -> Result<bool> {
    match target.parent() {
        Some(parent) => create_dir_within(dest_root, parent),
        None => Ok(false),
    }
}

const fn is_symlink_mode(mode: u32) -> bool {
    mode & 0o170_000 == 0o120_000
}

/// Whether `dir` contains at least one regular file anywhere beneath it.
#[must_use]
pub fn has_any_file(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .any(|entry| {
            entry.file_type().is_file()
                && entry.depth() > 0
                && !(entry.depth() == 1 && entry.file_name() == MARKER_FILE)
        })
}

/// Effective package root inside a staging directory.
///
/// Packages are often wrapped in a single top-level folder. If, ignoring
/// [`NOISE_ENTRIES`], the directory holds exactly one subdirectory and no
/// files, that subdirectory is the root; otherwise the directory itself is.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn find_staged_root(staging_dir: &Path) -> Result<PathBuf> {
    let mut dirs = Vec::new();
    let mut files = 0usize;

    for entry in fs::read_dir(staging_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if NOISE_ENTRIES.iter().any(|n| name == *n) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        } else {
            files += 1;
        }
    }

    if files == 0 && dirs.len() == 1 {
        if let Some(only) = dirs.pop() {
            debug!("Package is wrapped in {}", only.display());
            return Ok(only);
        }
    }
    Ok(staging_dir.to_path_buf())
}
