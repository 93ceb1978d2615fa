//! Update check: fetch, compare, download, verify, stage.

use crate::config::UpdaterConfig;
use crate::context::InstallationContext;
use crate::error::{Error, Result};
use crate::event::{emit, UpdateEvent, UpdateEventsSender};
use crate::upgrade::extract::{has_any_file, safe_extract};
use crate::upgrade::integrity::{
    check_digest, check_min_size, log_status, verify_checksum, ChecksumStatus, StreamingDigest,
};
use crate::upgrade::lock::UpdateLock;
use crate::upgrade::manifest::{parse_manifest_bytes, Asset, Manifest};
use crate::upgrade::source::PackageSource;
use crate::upgrade::staging::{MarkerRead, StagingRecord, StagingStore};
use crate::upgrade::version::is_newer;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Emit a progress event every this many bytes.
const PROGRESS_STEP: u64 = 1024 * 1024;

/// Result of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The published version is not newer than the installed one.
    UpToDate {
        /// Installed version.
        current: String,
        /// Published version.
        latest: String,
    },
    /// A newer version is staged and ready to apply.
    Staged(StagedUpdate),
}

/// Details of a staged version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUpdate {
    /// Staged version.
    pub version: String,
    /// Release tag.
    pub release_tag: String,
    /// Release channel.
    pub channel: String,
    /// Package URL.
    pub download_url: String,
    /// Release notes, if the manifest carried any.
    pub changelog: Option<String>,
    /// Staging directory.
    pub staging_dir: PathBuf,
    /// Whether the package matched a published checksum.
    pub verified: bool,
    /// Whether this run found the version already staged and did nothing.
    pub already_staged: bool,
    /// Archive entries refused during extraction.
    pub skipped_entries: usize,
}

/// Checks the manifest and stages newer releases.
pub struct UpdateChecker<S> {
    ctx: InstallationContext,
    config: UpdaterConfig,
    store: StagingStore,
    source: S,
    events: Option<UpdateEventsSender>,
}

impl<S: PackageSource> UpdateChecker<S> {
    /// Create a checker for `ctx` using `source` for network access.
    #[must_use]
    pub fn new(ctx: InstallationContext, config: UpdaterConfig, source: S) -> Self {
        let store = StagingStore::new(ctx.updates_dir());
        Self {
            ctx,
            config,
            store,
            source,
            events: None,
        }
    }

    /// Publish progress on `events`.
    #[must_use]
    pub fn with_events(mut self, events: UpdateEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// The staging store this checker writes to.
    #[must_use]
    pub fn store(&self) -> &StagingStore {
        &self.store
    }

    /// Run one check cycle.
    ///
    /// # Errors
    ///
    /// Returns the error kind of the step that failed. Nothing is staged
    /// unless every step succeeded.
    pub async fn check(&self) -> Result<CheckOutcome> {
        let result = self.run().await;
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

    async fn run(&self) -> Result<CheckOutcome> {
        let _lock = UpdateLock::acquire(self.store.root())?;
        let current = self.ctx.current_version();
        info!("Checking for updates (current {current}, platform {})", self.ctx.platform());
        emit(
            self.events.as_ref(),
            UpdateEvent::CheckStarted {
                current: current.to_string(),
            },
        );

        let manifest = self.fetch_manifest().await?;
        let asset = manifest
            .asset_for(self.ctx.platform())
            .ok_or_else(|| Error::NoAssetForPlatform {
                platform: self.ctx.platform().to_string(),
                available: manifest.platforms(),
            })?;

        if !is_newer(&manifest.version, current) {
            info!("Up to date: installed {current}, latest {}", manifest.version);
            emit(
                self.events.as_ref(),
                UpdateEvent::UpToDate {
                    latest: manifest.version.clone(),
                },
            );
            return Ok(CheckOutcome::UpToDate {
                current: current.to_string(),
                latest: manifest.version,
            });
        }

        info!(
            "Update available: {current} -> {} ({} channel)",
            manifest.version, manifest.channel
        );

        if self.store.is_staged(&manifest.version) {
            info!("Version {} is already staged", manifest.version);
            return Ok(CheckOutcome::Staged(self.already_staged(&manifest, asset)));
        }

        self.store.ensure_layout()?;
        let (package, status) = self.obtain_package(&manifest, asset).await?;
        emit(
            self.events.as_ref(),
            UpdateEvent::Verified {
                verified: status.is_verified(),
            },
        );

        let (staging_dir, skipped_entries) = self.stage(&manifest, asset, &package, &status)?;
        emit(
            self.events.as_ref(),
            UpdateEvent::Staged {
                version: manifest.version.clone(),
            },
        );

        Ok(CheckOutcome::Staged(StagedUpdate {
            version: manifest.version.clone(),
            release_tag: manifest.release_tag.clone(),
            channel: manifest.channel.to_string(),
            download_url: asset.url.clone(),
            changelog: manifest.changelog.clone(),
            staging_dir,
            verified: status.is_verified(),
            already_staged: false,
            skipped_entries,
        }))
    }

    async fn fetch_manifest(&self) -> Result<Manifest> {
        let raw = self.source.fetch_manifest(&self.config.manifest_url).await?;
        parse_manifest_bytes(&raw)
    }

    fn already_staged(&self, manifest: &Manifest, asset: &Asset) -> StagedUpdate {
        let staging_dir = self.store.staging_dir_for(&manifest.version);
        let verified = match StagingStore::read_marker(&staging_dir) {
            MarkerRead::Present(record) => record.verified,
            MarkerRead::Missing | MarkerRead::Malformed(_) => false,
        };

        StagedUpdate {
            version: manifest.version.clone(),
            release_tag: manifest.release_tag.clone(),
            channel: manifest.channel.to_string(),
            download_url: asset.url.clone(),
            changelog: manifest.changelog.clone(),
            staging_dir,
            verified,
            already_staged: true,
            skipped_entries: 0,
        }
    }

    /// Produce a verified package at the cache path, reusing a cached copy
    /// only if it matches the published checksum.
    async fn obtain_package(
        &self,
        manifest: &Manifest,
        asset: &Asset,
    ) -> Result<(PathBuf, ChecksumStatus)> {
        let cache_path = self.store.cache_zip_path_for(&manifest.version);

        if cache_path.is_file() {
            match asset.sha256.as_deref() {
                Some(expected) => {
                    let status = verify_checksum(&cache_path, Some(expected))?;
                    if status.is_verified() {
                        info!("Reusing verified cached package {}", cache_path.display());
                        return Ok((cache_path, status));
                    }
                    warn!("Discarding stale cached package {}", cache_path.display());
                }
                None => debug!(
                    "No checksum to validate cached {}, downloading again",
                    cache_path.display()
                ),
            }
            std::fs::remove_file(&cache_path)?;
        }

        info!("Downloading {}", asset.url);
        let tmp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(self.store.cache_dir())?;
        let mut sink = ProgressSink::new(tmp, self.events.as_ref());
        let bytes = self.source.download(&asset.url, &mut sink).await?;
        let (tmp, digest) = sink.finish()?;
        debug!("Downloaded {bytes} bytes to {}", tmp.path().display());

        check_min_size(tmp.path(), self.config.min_package_bytes)?;

        let status = check_digest(digest, asset.sha256.as_deref());
        log_status(tmp.path(), &status);
        let status = status.into_result()?;

        tmp.persist(&cache_path).map_err(|e| Error::Io(e.error))?;
        Ok((cache_path, status))
    }

    fn stage(
        &self,
        manifest: &Manifest,
        asset: &Asset,
        package: &Path,
        status: &ChecksumStatus,
    ) -> Result<(PathBuf, usize)> {
        let partial = self.store.begin_staging(&manifest.version)?;
        let report = safe_extract(package, partial.path())?;

        for (name, reason) in &report.skipped {
            emit(
                self.events.as_ref(),
                UpdateEvent::EntrySkipped {
                    path: PathBuf::from(name),
                    reason: reason.clone(),
                },
            );
        }

        if !has_any_file(partial.path()) {
            return Err(Error::EmptyPackage(format!(
                "{} contains no files",
                package.display()
            )));
        }

        let digest = match status {
            ChecksumStatus::Verified { digest } | ChecksumStatus::Unverified { digest } => {
                Some(digest.clone())
            }
            ChecksumStatus::Mismatch { .. } => None,
        };
        let mut record = StagingRecord::new(manifest, asset, digest);
        record.verified = status.is_verified();
        StagingStore::write_marker(partial.path(), &record)?;

        let dir = self.store.commit_staging(partial, &manifest.version)?;
        Ok((dir, report.skipped.len()))
    }
}

/// Writes a download to a temp file while hashing it and reporting progress.
struct ProgressSink<'a> {
    file: NamedTempFile,
    digest: StreamingDigest,
    written: u64,
    next_report: u64,
    events: Option<&'a UpdateEventsSender>,
}

impl<'a> ProgressSink<'a> {
    fn new(file: NamedTempFile, events: Option<&'a UpdateEventsSender>) -> Self {
        Self {
            file,
            digest: StreamingDigest::default(),
            written: 0,
            next_report: PROGRESS_STEP,
            events,
        }
    }

    fn finish(mut self) -> Result<(NamedTempFile, String)> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;
        emit(
            self.events,
            UpdateEvent::DownloadProgress {
                downloaded: self.written,
            },
        );
        Ok((self.file, self.digest.finish()))
    }
}

impl Write for ProgressSink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.digest.update(&buf[..n]);
        self.written += n as u64;
        if self.written >= self.next_report {
            emit(
                self.events,
                UpdateEvent::DownloadProgress {
                    downloaded: self.written,
                },
            );
            self.next_report = self.written + PROGRESS_STEP;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}
