//! Test harness: synthetic installations and an in-memory package source.

use async_trait::async_trait;
use bytes::Bytes;
use portable_updater::config::UpdaterConfig;
use portable_updater::context::InstallationContext;
use portable_updater::upgrade::{DownloadSink, PackageSource, StagingStore, StreamingDigest};
use portable_updater::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// URL the harness serves the manifest from.
pub const MANIFEST_URL: &str = "memory://releases/manifest.json";

/// Build a zip package in memory from `(name, content)` pairs.
#[must_use]
pub fn package_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut digest = StreamingDigest::default();
    digest.update(data);
    digest.finish()
}

/// A portable installation rooted in a temp directory.
///
/// Layout: `app.bin = "v1"`, `data/settings.json = "keep-me"`.
pub struct TestInstall {
    _tmp: TempDir,
    root: PathBuf,
}

impl TestInstall {
    /// Create the installation.
    #[must_use]
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("PortableApp");
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("app.bin"), "v1").unwrap();
        fs::write(root.join("data").join("settings.json"), "keep-me").unwrap();
        Self { _tmp: tmp, root }
    }

    /// Installation root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Context for this installation on `linux` at `current_version`.
    #[must_use]
    pub fn context(&self, current_version: &str) -> InstallationContext {
        InstallationContext::new(
            self.root.clone(),
            "linux".to_string(),
            current_version.to_string(),
        )
    }

    /// Store over this installation's `updates/` directory.
    #[must_use]
    pub fn store(&self) -> StagingStore {
        StagingStore::new(self.root.join("updates"))
    }

    /// Config pointing at [`MANIFEST_URL`] with the size guard disabled.
    #[must_use]
    pub fn config() -> UpdaterConfig {
        UpdaterConfig {
            manifest_url: MANIFEST_URL.to_string(),
            min_package_bytes: 0,
            ..UpdaterConfig::default()
        }
    }

    /// Read a file relative to the root.
    #[must_use]
    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.root.join(relative)).unwrap()
    }

    /// Every path under `updates/staging/`, sorted.
    #[must_use]
    pub fn staging_snapshot(&self) -> Vec<PathBuf> {
        let staging = self.store().staging_root();
        if !staging.exists() {
            return Vec::new();
        }
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(&staging)
            .into_iter()
            .map(|e| e.unwrap().into_path())
            .collect();
        paths.sort();
        paths
    }
}

impl Default for TestInstall {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves a manifest and packages from memory and counts downloads.
#[derive(Default)]
pub struct MemorySource {
    manifest: Mutex<Option<Bytes>>,
    packages: Mutex<HashMap<String, Bytes>>,
    downloads: AtomicUsize,
}

impl MemorySource {
    /// Empty source: the manifest is unreachable until one is set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `manifest` as JSON.
    pub fn set_manifest(&self, manifest: &serde_json::Value) {
        *self.manifest.lock().unwrap() = Some(Bytes::from(manifest.to_string()));
    }

    /// Publish raw manifest bytes.
    pub fn set_manifest_raw(&self, raw: &str) {
        *self.manifest.lock().unwrap() = Some(Bytes::from(raw.to_string()));
    }

    /// Serve `data` at `url`.
    pub fn add_package(&self, url: &str, data: Vec<u8>) {
        self.packages
            .lock()
            .unwrap()
            .insert(url.to_string(), Bytes::from(data));
    }

    /// Number of package downloads attempted.
    #[must_use]
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Publish `version` for linux with `package`, optionally with its checksum.
    pub fn publish(&self, version: &str, package: Vec<u8>, sha256: Option<String>) {
        let url = format!("memory://releases/{version}/app-linux.zip");
        let mut asset = serde_json::json!({ "url": url, "type": "portable" });
        if let Some(sha) = sha256 {
            asset["sha256"] = serde_json::Value::String(sha);
        }
        self.set_manifest(&serde_json::json!({
            "version": version,
            "release_tag": format!("v{version}"),
            "channel": "stable",
            "changelog": format!("Release {version}"),
            "assets": { "linux": asset },
        }));
        self.add_package(&url, package);
    }
}

#[async_trait]
impl PackageSource for MemorySource {
    async fn fetch_manifest(&self, url: &str) -> Result<Bytes> {
        self.manifest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::ManifestUnreachable(format!("{url}: nothing published")))
    }

    async fn download(&self, url: &str, sink: &mut dyn DownloadSink) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let data = self
            .packages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::DownloadFailed(format!("{url}: 404")))?;

        // Deliver in small pieces so progress and hashing see several chunks.
        for chunk in data.chunks(7) {
            sink.write_chunk(chunk)
                .map_err(|e| Error::DownloadFailed(e.to_string()))?;
        }
        Ok(data.len() as u64)
    }
}
