//! # upkeep-backup
//!
//! Checksummed snapshots of workspace files, taken before every update.
//!
//! Call [`BackupManager::create_backup`] to snapshot a file list,
//! [`BackupManager::validate_backup`] to verify one, and
//! [`BackupManager::restore_from_backup`] to put it back.
//!
//! ```text
//! <backupRoot>/backup-<ISO8601-dashed>/
//!   manifest.json
//!   files/<relativePath>
//! ```

pub mod error;
pub mod manager;
pub mod manifest;
pub mod restore;

pub use error::BackupError;
pub use manager::{BackupManager, BackupSummary, CleanupReport};
pub use manifest::{Backup, BackupKind, BackupManifest, BackupMetadata, BackupStatus, FileEntry};
pub use restore::{PreservedFile, RestoreOptions, RestoreOutcome, RestorePreview, RestoreReport};
