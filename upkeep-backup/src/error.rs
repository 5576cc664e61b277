//! Error types for upkeep-backup.

use std::path::PathBuf;

use thiserror::Error;

use upkeep_core::{BackupId, CoreError};

/// All errors that can arise from backup, validation, and restore.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to parse manifest at {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backup {id} has no manifest")]
    ManifestMissing { id: BackupId },

    #[error("backup {id} was never completed")]
    Incomplete { id: BackupId },

    #[error("backup {id}: manifest declares {declared} files but lists {listed}")]
    CountMismatch {
        id: BackupId,
        declared: usize,
        listed: usize,
    },

    #[error("backup {id}: {path} is missing")]
    FileMissing { id: BackupId, path: String },

    #[error("backup {id}: {path} is {actual} bytes, manifest says {expected}")]
    SizeMismatch {
        id: BackupId,
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("backup {id}: checksum mismatch for {path}")]
    ChecksumMismatch { id: BackupId, path: String },

    /// A manifest entry resolves outside the directory it belongs to.
    #[error("backup {id}: entry {path} escapes its root")]
    EscapingPath { id: BackupId, path: String },

    #[error("Backup {id} is invalid or corrupted")]
    InvalidOrCorrupted { id: BackupId },

    #[error("Backup creation failed: {0}")]
    CreationFailed(#[source] Box<BackupError>),
}

impl BackupError {
    /// True for errors that describe a damaged backup rather than a failure
    /// of the local filesystem.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            BackupError::ManifestParse { .. }
                | BackupError::ManifestMissing { .. }
                | BackupError::Incomplete { .. }
                | BackupError::CountMismatch { .. }
                | BackupError::FileMissing { .. }
                | BackupError::SizeMismatch { .. }
                | BackupError::ChecksumMismatch { .. }
                | BackupError::EscapingPath { .. }
                | BackupError::InvalidOrCorrupted { .. }
        )
    }
}

/// Convenience constructor for [`BackupError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BackupError {
    BackupError::Io {
        path: path.into(),
        source,
    }
}
