//! Release manifest model.
//!
//! The manifest is validated eagerly when it is parsed; nothing downstream
//! ever sees an unvalidated shape.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Asset type assumed when the manifest omits one.
pub const DEFAULT_ASSET_TYPE: &str = "portable";

/// Release channel. Informational only; it does not gate downloads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Channel {
    /// Stable releases.
    #[default]
    Stable,
    /// Development builds.
    Dev,
    /// Any other channel name, passed through unchanged.
    Other(String),
}

impl Channel {
    fn from_name(name: &str) -> Self {
        match name {
            "stable" => Self::Stable,
            "dev" => Self::Dev,
            other => Self::Other(other.to_string()),
        }
    }

    /// Channel name as written in the manifest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stable => "stable",
            Self::Dev => "dev",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downloadable package for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Download URL. Never blank.
    pub url: String,
    /// Lowercase hex SHA-256 of the package, if published.
    pub sha256: Option<String>,
    /// Package kind, `portable` unless stated.
    pub asset_type: String,
}

/// A validated release manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Release version.
    pub version: String,
    /// Release tag.
    pub release_tag: String,
    /// Release channel.
    pub channel: Channel,
    /// Optional human-readable release notes.
    pub changelog: Option<String>,
    /// Assets keyed by platform key. Never empty.
    pub assets: BTreeMap<String, Asset>,
}

impl Manifest {
    /// Asset for `platform`, if the release ships one.
    #[must_use]
    pub fn asset_for(&self, platform: &str) -> Option<&Asset> {
        self.assets.get(platform)
    }

    /// Comma separated platform keys, for diagnostics.
    #[must_use]
    pub fn platforms(&self) -> String {
        self.assets.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Whether `s` is exactly 64 hex digits.
#[must_use]
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parse and validate a manifest from raw JSON bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedManifest`] if the bytes are not JSON or the
/// document violates the manifest schema.
pub fn parse_manifest_bytes(raw: &[u8]) -> Result<Manifest> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| Error::MalformedManifest(format!("invalid JSON: {e}")))?;
    parse_manifest(&value)
}

/// Validate a manifest document.
///
/// Unknown top-level keys are ignored. Individual malformed asset entries are
/// dropped as long as at least one valid asset remains.
///
/// # Errors
///
/// Returns [`Error::MalformedManifest`] if the document is not an object, a
/// required field is missing or blank, or no valid asset remains.
pub fn parse_manifest(raw: &Value) -> Result<Manifest> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::MalformedManifest("manifest is not a JSON object".to_string()))?;

    let version = required_str(obj, "version")?;
    if !is_path_safe(&version) {
        return Err(Error::MalformedManifest(format!(
            "version '{version}' cannot be used as a directory name"
        )));
    }
    let release_tag = required_str(obj, "release_tag")?;

    let channel = match obj.get("channel") {
        None | Some(Value::Null) => Channel::Stable,
        Some(Value::String(name)) if !name.trim().is_empty() => Channel::from_name(name.trim()),
        Some(Value::String(_)) => Channel::Stable,
        Some(other) => {
            warn!("Ignoring non-string manifest channel {other}, assuming stable");
            Channel::Stable
        }
    };

    let changelog = obj
        .get("changelog")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let raw_assets = obj
        .get("assets")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::MalformedManifest("'assets' missing or not an object".to_string()))?;

    let assets: BTreeMap<String, Asset> = raw_assets
        .iter()
        .filter_map(|(platform, entry)| match parse_asset(entry) {
            Some(asset) => Some((platform.clone(), asset)),
            None => {
                warn!("Dropping malformed manifest asset for platform '{platform}'");
                None
            }
        })
        .collect();

    if assets.is_empty() {
        return Err(Error::MalformedManifest(
            "no valid asset entries".to_string(),
        ));
    }

    Ok(Manifest {
        version,
        release_tag,
        channel,
        changelog,
        assets,
    })
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedManifest(format!("'{key}' missing or blank")))
}

/// A present but malformed checksum invalidates the whole asset entry; it is
/// never silently downgraded to "unverified".
fn parse_asset(entry: &Value) -> Option<Asset> {
    let obj = entry.as_object()?;

    let url = obj.get("url")?.as_str()?.trim();
    if url.is_empty() {
        return None;
    }

    let sha256 = match obj.get("sha256") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) if is_sha256_hex(s.trim()) => Some(s.trim().to_ascii_lowercase()),
        Some(_) => return None,
    };

    let asset_type = obj
        .get("type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ASSET_TYPE)
        .to_string();

    Some(Asset {
        url: url.to_string(),
        sha256,
        asset_type,
    })
}

fn is_path_safe(version: &str) -> bool {
    version != "."
        && version != ".."
        && !version.starts_with('.')
        && !version
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control())
}
