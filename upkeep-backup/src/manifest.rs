//! On-disk backup manifest (`<backup>/manifest.json`, camelCase keys).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use upkeep_core::BackupId;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FILES_DIR: &str = "files";

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    PreUpdate,
    #[default]
    Manual,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::PreUpdate => write!(f, "pre-update"),
            BackupKind::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    #[serde(rename = "type")]
    pub kind: BackupKind,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
}

impl BackupMetadata {
    /// Metadata for the snapshot taken before moving `from` -> `to`.
    pub fn pre_update(from: Option<&str>, to: &str) -> Self {
        Self {
            kind: BackupKind::PreUpdate,
            description: format!(
                "Pre-update backup ({} -> {to})",
                from.unwrap_or("unknown")
            ),
            version: from.map(str::to_string),
            target_version: Some(to.to_string()),
        }
    }

    pub fn manual(description: impl Into<String>) -> Self {
        Self {
            kind: BackupKind::Manual,
            description: description.into(),
            version: None,
            target_version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupStatus {
    InProgress,
    Completed,
}

/// One backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Where the file lived when it was backed up.
    pub original_path: PathBuf,
    /// Location of the copy, relative to the backup directory.
    pub backup_path: String,
    /// Location relative to the project root; restore replays it under the
    /// target root.
    pub relative_path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub id: BackupId,
    pub timestamp: DateTime<Utc>,
    pub metadata: BackupMetadata,
    pub files: Vec<FileEntry>,
    pub total_size: u64,
    pub file_count: usize,
    pub status: BackupStatus,
}

/// A backup on disk: its directory and its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub path: PathBuf,
    pub manifest: BackupManifest,
}

impl Backup {
    pub fn id(&self) -> &BackupId {
        &self.manifest.id
    }
}
