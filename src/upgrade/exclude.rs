//! Top-level names protected from replacement.
//!
//! Only the immediate children of the installation root are matched. Apply
//! never removes or overwrites a protected entry, and backups skip them when
//! they are updater churn rather than user data.

use std::collections::BTreeSet;
use std::ffi::OsStr;

/// Protected in every installation: user data, updater state, VCS and cache
/// directories.
pub const DEFAULT_EXCLUDES: &[&str] = &["data", "updates", ".git", ".svn", ".hg", ".cache"];

/// Excluded from backups: the updater's own state and VCS metadata. User
/// data is included.
pub const BACKUP_EXCLUDES: &[&str] = &["updates", ".git", ".svn", ".hg", ".cache"];

/// Set of protected top-level names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeSet {
    names: BTreeSet<String>,
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::from_names(DEFAULT_EXCLUDES.iter().copied())
    }
}

impl ExcludeSet {
    /// Set containing exactly `names`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Defaults used by backups.
    #[must_use]
    pub fn for_backup() -> Self {
        Self::from_names(BACKUP_EXCLUDES.iter().copied())
    }

    /// Add more names, ignoring blanks and anything containing a separator.
    #[must_use]
    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in extra {
            let name = name.as_ref().trim();
            if !name.is_empty() && !name.contains(['/', '\\']) {
                self.names.insert(name.to_string());
            }
        }
        self
    }

    /// Whether a top-level entry named `name` is protected.
    #[must_use]
    pub fn contains(&self, name: &OsStr) -> bool {
        name.to_str().is_some_and(|n| self.names.contains(n))
    }

    /// Protected names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
