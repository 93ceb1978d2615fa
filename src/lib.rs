//! # portable-updater
//!
//! Self-updater for portable applications that live in a single folder.
//!
//! An update is two phases:
//!
//! - **Check** ([`UpdateChecker`]): fetch the release manifest, compare the
//!   published version with the installed one, download the platform
//!   package, verify its SHA-256 digest and extract it into
//!   `updates/staging/<version>/`.
//! - **Apply** ([`UpdateApplier`]): with the application closed, back up the
//!   installation, remove its managed files and copy the staged release in.
//!   User data under `data/` is never touched.
//!
//! ```text
//! <install_root>/
//! ├── data/                 user data, never replaced
//! └── updates/
//!     ├── cache/            downloaded packages
//!     ├── staging/<ver>/    extracted releases + _update_marker.json
//!     └── backup/           pre_update_<ver>_<timestamp>.zip
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod upgrade;

pub use config::{SettingsLoad, UpdaterConfig, SETTINGS_RELATIVE_PATH};
pub use context::{platform_key, resolve_current_version, InstallationContext};
pub use error::{Error, Result};
pub use event::{create_event_channel, UpdateEvent, UpdateEventsChannel, UpdateEventsSender};
pub use upgrade::{
    ApplyReport, CheckOutcome, HttpSource, PackageSource, StagedUpdate, StagingStore,
    UpdateApplier, UpdateChecker,
};
