//! Where manifests and packages come from.
//!
//! [`PackageSource`] is the seam between the orchestrators and the network.
//! [`HttpSource`] is the production implementation; tests supply their own.

use crate::config::UpdaterConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Receives package bytes as they arrive.
pub trait DownloadSink: Send {
    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk cannot be stored.
    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()>;
}

impl<W: Write + Send> DownloadSink for W {
    fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.write_all(chunk)
    }
}

/// Fetches manifests and streams packages.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Fetch the raw manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestUnreachable`] if the document cannot be
    /// retrieved.
    async fn fetch_manifest(&self, url: &str) -> Result<Bytes>;

    /// Stream the package at `url` into `sink`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DownloadFailed`] on any network or write failure.
    async fn download(&self, url: &str, sink: &mut dyn DownloadSink) -> Result<u64>;
}

#[async_trait]
impl<T: PackageSource + ?Sized> PackageSource for Arc<T> {
    async fn fetch_manifest(&self, url: &str) -> Result<Bytes> {
        (**self).fetch_manifest(url).await
    }

    async fn download(&self, url: &str, sink: &mut dyn DownloadSink) -> Result<u64> {
        (**self).download(url, sink).await
    }
}

/// HTTP(S) source backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    manifest_timeout: Duration,
    read_timeout: Duration,
}

impl HttpSource {
    /// Build a client using the timeouts and user agent from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            manifest_timeout: config.manifest_timeout(),
            read_timeout: config.download_timeout(),
        })
    }
}

#[async_trait]
impl PackageSource for HttpSource {
    async fn fetch_manifest(&self, url: &str) -> Result<Bytes> {
        debug!("Fetching manifest from {url}");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.manifest_timeout)
            .send()
            .await
            .map_err(|e| Error::ManifestUnreachable(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::ManifestUnreachable(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::ManifestUnreachable(format!("{url}: failed to read body: {e}")))
    }

    async fn download(&self, url: &str, sink: &mut dyn DownloadSink) -> Result<u64> {
        debug!("Downloading {url}");

        let mut response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| Error::DownloadFailed(format!("{url}: no response within {:?}", self.read_timeout)))?
            .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DownloadFailed(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let mut total = 0u64;
        loop {
            let chunk = tokio::time::timeout(self.read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    Error::DownloadFailed(format!(
                        "{url}: stalled for {:?} after {total} bytes",
                        self.read_timeout
                    ))
                })?
                .map_err(|e| Error::DownloadFailed(format!("{url}: {e}")))?;

            let Some(chunk) = chunk else {
                break;
            };
            sink.write_chunk(&chunk)
                .map_err(|e| Error::DownloadFailed(format!("failed to write package: {e}")))?;
            total += chunk.len() as u64;
        }

        debug!("Downloaded {total} bytes from {url}");
        Ok(total)
    }
}
