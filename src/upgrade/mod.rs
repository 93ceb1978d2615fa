//! Self-update pipeline for portable installations.
//!
//! This module handles:
//! - Fetching the release manifest and picking the platform asset
//! - Downloading and verifying packages against published SHA-256 digests
//! - Extracting packages into `updates/staging/<version>/` without letting
//!   any entry escape the staging directory
//! - Backing up the installation and swapping in a staged release
//!
//! Check and apply are separate steps: [`UpdateChecker`] runs while the
//! application is live and only writes under `updates/`, [`UpdateApplier`]
//! runs at startup before the application opens its own files.

mod applier;
mod backup;
mod checker;
mod exclude;
mod extract;
mod integrity;
mod lock;
mod manifest;
mod source;
mod staging;
mod version;

pub use applier::{ApplyReport, UpdateApplier};
pub use backup::{backup_file_name, create_backup};
pub use checker::{CheckOutcome, StagedUpdate, UpdateChecker};
pub use exclude::{ExcludeSet, BACKUP_EXCLUDES, DEFAULT_EXCLUDES};
pub use extract::{
    detect_format, find_staged_root, has_any_file, safe_extract, sanitize_entry_name,
    ArchiveFormat, ExtractReport, NOISE_ENTRIES,
};
pub use integrity::{
    check_digest, check_min_size, sha256_file, verify_checksum, ChecksumStatus, StreamingDigest,
    CHUNK_SIZE,
};
pub use lock::{UpdateLock, LOCK_FILE};
pub use manifest::{
    is_sha256_hex, parse_manifest, parse_manifest_bytes, Asset, Channel, Manifest,
    DEFAULT_ASSET_TYPE,
};
pub use source::{DownloadSink, HttpSource, PackageSource};
pub use staging::{MarkerRead, StagingRecord, StagingStore, MARKER_FILE};
pub use version::{compare_versions, is_newer, DottedVersion, InvalidVersion};
