//! Update event system.

use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events emitted while checking for or applying an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// A check has started.
    CheckStarted {
        /// Version currently installed.
        current: String,
    },

    /// The remote version is not newer than the installed one.
    UpToDate {
        /// Version published in the manifest.
        latest: String,
    },

    /// Bytes received so far for a package download.
    DownloadProgress {
        /// Bytes written to the cache.
        downloaded: u64,
    },

    /// The package passed (or skipped) checksum verification.
    Verified {
        /// `false` when the manifest carried no checksum.
        verified: bool,
    },

    /// A version has been extracted and marked as staged.
    Staged {
        /// Staged version.
        version: String,
    },

    /// An apply has started.
    ApplyStarted {
        /// Version being installed.
        version: String,
    },

    /// The pre-apply backup archive has been written.
    BackupCreated {
        /// Path of the archive.
        path: PathBuf,
    },

    /// A path was skipped instead of failing the operation.
    EntrySkipped {
        /// The skipped path or archive entry name.
        path: PathBuf,
        /// Why it was skipped.
        reason: String,
    },

    /// Apply completed; the application must restart.
    Applied {
        /// Installed version.
        version: String,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving update events.
pub type UpdateEventsChannel = broadcast::Receiver<UpdateEvent>;

/// Sender for update events.
pub type UpdateEventsSender = broadcast::Sender<UpdateEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (UpdateEventsSender, UpdateEventsChannel) {
    broadcast::channel(256)
}

/// Send `event` if a sender is attached. Lagging or absent receivers are ignored.
pub(crate) fn emit(events: Option<&UpdateEventsSender>, event: UpdateEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
