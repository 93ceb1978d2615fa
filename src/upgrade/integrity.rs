//! SHA-256 integrity verification for downloaded packages.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Read buffer size used when hashing.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a checksum check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    /// The digest matched the published checksum.
    Verified {
        /// Lowercase hex digest.
        digest: String,
    },
    /// No checksum was published; the file was accepted as-is.
    Unverified {
        /// Lowercase hex digest, recorded for provenance.
        digest: String,
    },
    /// The digest did not match.
    Mismatch {
        /// Published checksum, lowercased.
        expected: String,
        /// Actual digest.
        actual: String,
    },
}

impl ChecksumStatus {
    /// `true` unless the checksum mismatched.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Mismatch { .. })
    }

    /// `true` only for a checked match.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    /// Convert a mismatch into [`Error::ChecksumMismatch`].
    ///
    /// # Errors
    ///
    /// Returns an error if the status is [`ChecksumStatus::Mismatch`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Mismatch { expected, actual } => Err(Error::ChecksumMismatch { expected, actual }),
            accepted => Ok(accepted),
        }
    }
}

/// Incremental hasher for data that is being written elsewhere.
#[derive(Default)]
pub struct StreamingDigest {
    hasher: Sha256,
}

impl StreamingDigest {
    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Lowercase hex digest of everything fed so far.
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Compute the lowercase hex SHA-256 of a file, streaming it in
/// [`CHUNK_SIZE`] blocks.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a read fails.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut digest = StreamingDigest::default();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }

    Ok(digest.finish())
}

/// Compare a digest against an optional published checksum.
#[must_use]
pub fn check_digest(actual: String, expected: Option<&str>) -> ChecksumStatus {
    match expected {
        None => ChecksumStatus::Unverified { digest: actual },
        Some(expected) if expected.trim().eq_ignore_ascii_case(&actual) => {
            ChecksumStatus::Verified { digest: actual }
        }
        Some(expected) => ChecksumStatus::Mismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        },
    }
}

/// Verify a file against an optional published checksum.
///
/// A missing checksum yields [`ChecksumStatus::Unverified`] and logs a
/// warning; a mismatch is returned as a status, not an error.
///
/// # Errors
///
/// Returns an error only if the file cannot be read.
pub fn verify_checksum(path: &Path, expected: Option<&str>) -> Result<ChecksumStatus> {
    debug!("Verifying checksum of {}", path.display());
    let status = check_digest(sha256_file(path)?, expected);
    log_status(path, &status);
    Ok(status)
}

pub(crate) fn log_status(path: &Path, status: &ChecksumStatus) {
    match status {
        ChecksumStatus::Verified { digest } => {
            debug!("Checksum verified for {}: {digest}", path.display());
        }
        ChecksumStatus::Unverified { digest } => {
            warn!(
                "No published checksum for {}; accepted UNVERIFIED (sha256 {digest})",
                path.display()
            );
        }
        ChecksumStatus::Mismatch { expected, actual } => {
            warn!(
                "Checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            );
        }
    }
}

/// Reject files smaller than `min_bytes`. Zero disables the check.
///
/// Returns the file size.
///
/// # Errors
///
/// Returns [`Error::DownloadFailed`] for an undersized file, or an I/O
/// error if its metadata cannot be read.
pub fn check_min_size(path: &Path, min_bytes: u64) -> Result<u64> {
    let size = std::fs::metadata(path)?.len();
    if size < min_bytes {
        return Err(Error::DownloadFailed(format!(
            "package is only {size} bytes (minimum {min_bytes}); truncated or not a package"
        )));
    }
    Ok(size)
}
