//! Dotted-numeric version ordering.
//!
//! Release versions in this system are plain dotted numbers with any number
//! of components (`0.3.0.1` is a four-part `0.MAJOR.MINOR.PATCH`). A missing
//! trailing component compares as zero, so `1.2` and `1.2.0` are equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed dotted-numeric version.
#[derive(Debug, Clone)]
pub struct DottedVersion {
    parts: Vec<u64>,
}

/// The string is not a dotted-numeric version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVersion(pub String);

impl fmt::Display for InvalidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a dotted-numeric version: '{}'", self.0)
    }
}

impl std::error::Error for InvalidVersion {}

impl DottedVersion {
    /// Numeric components, as written.
    #[must_use]
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }
}

impl FromStr for DottedVersion {
    type Err = InvalidVersion;

    /// Parse `1.2.3`, `v0.3.0.1`, etc. A single leading `v` is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Err(InvalidVersion(s.to_string()));
        }

        let parts = body
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                part.parse::<u64>().ok()
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| InvalidVersion(s.to_string()))?;

        Ok(Self { parts })
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DottedVersion {}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// Whether `remote` should be offered as an update over `current`.
///
/// When both parse as dotted-numeric versions this is a strict numeric
/// comparison. If either does not parse, any textual difference counts as
/// newer, so `1.0-beta` vs `1.0-rc` is an upgrade in either direction.
#[must_use]
pub fn is_newer(remote: &str, current: &str) -> bool {
    match (remote.parse::<DottedVersion>(), current.parse::<DottedVersion>()) {
        (Ok(r), Ok(c)) => r > c,
        _ => remote.trim() != current.trim(),
    }
}

/// Order two version strings: numerically when both parse, parseable before
/// unparseable otherwise, and lexicographically among unparseable ones.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.parse::<DottedVersion>(), b.parse::<DottedVersion>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
