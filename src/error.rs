//! Error types for portable-updater.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while checking for or applying an update.
///
/// Every variant is terminal for the run that produced it. Retrying is the
/// caller's concern.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The manifest could not be fetched.
    #[error("Manifest unreachable: {0}")]
    ManifestUnreachable(String),

    /// The manifest was fetched but violates the expected schema.
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// The manifest has no asset for this machine's platform key.
    #[error("No asset for platform '{platform}' (available: {available})")]
    NoAssetForPlatform {
        /// Platform key that was looked up.
        platform: String,
        /// Comma separated list of the keys the manifest does offer.
        available: String,
    },

    /// The package download failed or was rejected before verification.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The downloaded package does not match the published checksum.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest published in the manifest.
        expected: String,
        /// Digest of the bytes on disk.
        actual: String,
    },

    /// The package extracted to an empty tree.
    #[error("Empty package: {0}")]
    EmptyPackage(String),

    /// The package could not be read as an archive.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// There is nothing staged to apply.
    #[error("No staged update")]
    NoStagedUpdate,

    /// The staging directory for the selected version is gone.
    #[error("Staging directory missing: {}", .0.display())]
    StagingMissing(PathBuf),

    /// The pre-apply backup could not be written. Nothing was modified.
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// Another check or apply holds the update lock.
    #[error("Update lock held: {} (remove it if no updater is running)", .0.display())]
    LockHeld(PathBuf),

    /// Generic filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, machine-readable name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ManifestUnreachable(_) => "manifest_unreachable",
            Self::MalformedManifest(_) => "malformed_manifest",
            Self::NoAssetForPlatform { .. } => "no_asset_for_platform",
            Self::DownloadFailed(_) => "download_failed",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::EmptyPackage(_) => "empty_package",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::NoStagedUpdate => "no_staged_update",
            Self::StagingMissing(_) => "staging_missing",
            Self::BackupFailed(_) => "backup_failed",
            Self::LockHeld(_) => "lock_held",
            Self::Io(_) => "io",
        }
    }

    /// Process exit code reported for this error.
    ///
    /// These values are a public contract with the host application and
    /// must not be renumbered.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::ManifestUnreachable(_) | Self::MalformedManifest(_) => 10,
            Self::NoAssetForPlatform { .. } => 11,
            Self::DownloadFailed(_) => 12,
            Self::ChecksumMismatch { .. } => 13,
            Self::EmptyPackage(_) => 14,
            Self::ExtractionFailed(_) => 15,
            Self::NoStagedUpdate => 20,
            Self::StagingMissing(_) => 21,
            Self::BackupFailed(_) => 22,
            Self::LockHeld(_) => 23,
            Self::Io(_) => 30,
        }
    }
}
