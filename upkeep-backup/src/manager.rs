//! Backup creation, validation, listing, and retention.
//!
//! ## `create_backup` protocol
//!
//! 1. Claim a fresh `backup-<timestamp>` directory (bump 1 ms on collision).
//! 2. Stream each readable input into `files/<relativePath>`, hashing as it
//!    copies. Unreadable inputs are skipped.
//! 3. Write `manifest.json` last (atomic `.tmp` + rename).
//! 4. Re-validate the finished backup.
//!
//! Any failure in steps 2-4 removes the whole backup directory.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, DurationRound, Utc};

use upkeep_core::checksum::{copy_with_checksum, sha256_file};
use upkeep_core::fsutil::{absolute_lexical, join_relative, normal_components, write_json_atomic};
use upkeep_core::BackupId;

use crate::error::{io_err, BackupError};
use crate::manifest::{
    Backup, BackupManifest, BackupMetadata, BackupStatus, FileEntry, FILES_DIR, MANIFEST_FILE,
};

pub const DEFAULT_BATCH_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One row of [`BackupManager::list_available_backups`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub id: BackupId,
    pub path: PathBuf,
    /// `None` when the manifest could not be read.
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<BackupMetadata>,
    pub file_count: usize,
    pub total_size: u64,
    pub valid: bool,
    /// The manifest is missing or unparseable.
    pub corrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub remaining: usize,
    pub deleted_backups: Vec<BackupId>,
}

// ---------------------------------------------------------------------------
// BackupManager
// ---------------------------------------------------------------------------

/// Owns one backup root. Project-relative paths are computed against
/// `project_root` (defaults to the current directory).
#[derive(Debug, Clone)]
pub struct BackupManager {
    pub(crate) root: PathBuf,
    pub(crate) project_root: PathBuf,
    batch_size: usize,
}

impl BackupManager {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            root: backup_root.into(),
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_project_root(mut self, project_root: impl Into<PathBuf>) -> Self {
        self.project_root = project_root.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn backup_root(&self) -> &Path {
        &self.root
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Directory for `id`, or `None` if `id` is not a single plain name.
    pub(crate) fn backup_dir(&self, id: &BackupId) -> Option<PathBuf> {
        let dir = join_relative(&self.root, id.as_str())?;
        (dir.parent() == Some(self.root.as_path())).then_some(dir)
    }

    // -- create -------------------------------------------------------------

    /// Snapshot `files` into a new backup.
    ///
    /// Relative inputs are resolved against the project root. Missing or
    /// unreadable inputs are skipped with a warning.
    pub fn create_backup(
        &self,
        files: &[PathBuf],
        metadata: BackupMetadata,
    ) -> Result<Backup, BackupError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| BackupError::CreationFailed(Box::new(io_err(&self.root, e))))?;
        let (id, timestamp, dir) = self
            .claim_backup_dir(Utc::now())
            .map_err(|e| BackupError::CreationFailed(Box::new(e)))?;

        match self.populate(&id, timestamp, &dir, files, metadata) {
            Ok(manifest) => {
                tracing::info!(
                    "created backup {id} ({} files, {} bytes)",
                    manifest.file_count,
                    manifest.total_size
                );
                Ok(Backup {
                    path: dir,
                    manifest,
                })
            }
            Err(e) => {
                tracing::warn!("backup {id} failed, removing {}: {e}", dir.display());
                let _ = std::fs::remove_dir_all(&dir);
                Err(BackupError::CreationFailed(Box::new(e)))
            }
        }
    }

    fn claim_backup_dir(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(BackupId, DateTime<Utc>, PathBuf), BackupError> {
        let mut ts = now
            .duration_trunc(chrono::Duration::milliseconds(1))
            .unwrap_or(now);
        loop {
            let id = backup_id_for(ts);
            let dir = self.root.join(id.as_str());
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((id, ts, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    ts = ts + chrono::Duration::milliseconds(1);
                }
                Err(e) => return Err(io_err(&dir, e)),
            }
        }
    }

    fn populate(
        &self,
        id: &BackupId,
        timestamp: DateTime<Utc>,
        dir: &Path,
        files: &[PathBuf],
        metadata: BackupMetadata,
    ) -> Result<BackupManifest, BackupError> {
        let files_dir = dir.join(FILES_DIR);
        std::fs::create_dir_all(&files_dir).map_err(|e| io_err(&files_dir, e))?;

        let mut entries: Vec<FileEntry> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (batch_no, batch) in files.chunks(self.batch_size).enumerate() {
            tracing::debug!("backup {id}: batch {} ({} files)", batch_no + 1, batch.len());
            for input in batch {
                let source = absolute_lexical(&self.project_root.join(input));
                let relative = self.relative_path_for(&source);
                if relative.is_empty() || !seen.insert(relative.clone()) {
                    continue;
                }
                if let Some(entry) = self.copy_into_backup(&source, &relative, &files_dir)? {
                    entries.push(entry);
                } else {
                    seen.remove(&relative);
                }
            }
        }

        let manifest = BackupManifest {
            id: id.clone(),
            timestamp,
            metadata,
            total_size: entries.iter().map(|e| e.size).sum(),
            file_count: entries.len(),
            files: entries,
            status: BackupStatus::Completed,
        };
        write_json_atomic(&dir.join(MANIFEST_FILE), &manifest)?;

        self.verify(id)?;
        Ok(manifest)
    }

    /// Copy one file; `Ok(None)` means the source was skipped.
    fn copy_into_backup(
        &self,
        source: &Path,
        relative: &str,
        files_dir: &Path,
    ) -> Result<Option<FileEntry>, BackupError> {
        let mut reader = match File::open(source) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("skipping {}: {e}", source.display());
                return Ok(None);
            }
        };
        let meta = match reader.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                tracing::warn!("skipping {}: not a regular file", source.display());
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!("skipping {}: {e}", source.display());
                return Ok(None);
            }
        };

        let dest = files_dir.join(relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let out = File::create(&dest).map_err(|e| io_err(&dest, e))?;
        let mut writer = BufWriter::new(out);
        let (checksum, size) =
            copy_with_checksum(&mut reader, &mut writer).map_err(|e| io_err(&dest, e))?;
        tracing::debug!("backed up {relative} ({size} bytes)");

        Ok(Some(FileEntry {
            original_path: source.to_path_buf(),
            backup_path: format!("{FILES_DIR}/{relative}"),
            relative_path: relative.to_string(),
            size,
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            checksum,
        }))
    }

    /// Project-relative `/`-separated path. Paths outside the project keep
    /// only their plain components.
    fn relative_path_for(&self, path: &Path) -> String {
        let root = absolute_lexical(&self.project_root);
        let rel = path.strip_prefix(&root).unwrap_or(path);
        normal_components(rel)
    }

    // -- validate -----------------------------------------------------------

    /// Read-only integrity check of backup `id`.
    pub fn validate_backup(&self, id: &BackupId) -> bool {
        match self.verify(id) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("backup {id} failed validation: {e}");
                false
            }
        }
    }

    /// Full check returning the first problem found.
    pub fn verify(&self, id: &BackupId) -> Result<BackupManifest, BackupError> {
        let dir = self
            .backup_dir(id)
            .ok_or_else(|| BackupError::ManifestMissing { id: id.clone() })?;
        let manifest = self
            .read_manifest(&dir)?
            .ok_or_else(|| BackupError::ManifestMissing { id: id.clone() })?;

        if manifest.status != BackupStatus::Completed {
            return Err(BackupError::Incomplete { id: id.clone() });
        }
        if manifest.file_count != manifest.files.len() {
            return Err(BackupError::CountMismatch {
                id: id.clone(),
                declared: manifest.file_count,
                listed: manifest.files.len(),
            });
        }
        for entry in &manifest.files {
            verify_entry(id, &dir, entry)?;
        }
        Ok(manifest)
    }

    /// Manifest for `id`, `None` when absent.
    pub fn load_manifest(&self, id: &BackupId) -> Result<Option<BackupManifest>, BackupError> {
        match self.backup_dir(id) {
            Some(dir) => self.read_manifest(&dir),
            None => Ok(None),
        }
    }

    fn read_manifest(&self, dir: &Path) -> Result<Option<BackupManifest>, BackupError> {
        let path = dir.join(MANIFEST_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| BackupError::ManifestParse { path, source })
    }

    // -- list / info --------------------------------------------------------

    /// Every backup directory, newest first, each with live validity.
    /// Directories without a readable manifest are listed as corrupted.
    pub fn list_available_backups(&self) -> Result<Vec<BackupSummary>, BackupError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root, e)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.root, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let id = BackupId::from(entry.file_name().to_string_lossy().into_owned());
            out.push(self.summarize(&id, entry.path()));
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Summary of `id` plus validity; `None` when it has no manifest.
    pub fn get_backup_info(&self, id: &BackupId) -> Result<Option<BackupSummary>, BackupError> {
        let Some(dir) = self.backup_dir(id) else {
            return Ok(None);
        };
        if !dir.join(MANIFEST_FILE).exists() {
            return Ok(None);
        }
        Ok(Some(self.summarize(id, dir)))
    }

    fn summarize(&self, id: &BackupId, dir: PathBuf) -> BackupSummary {
        match self.read_manifest(&dir) {
            Ok(Some(manifest)) => BackupSummary {
                id: id.clone(),
                timestamp: Some(manifest.timestamp),
                file_count: manifest.file_count,
                total_size: manifest.total_size,
                valid: self.validate_backup(id),
                metadata: Some(manifest.metadata),
                corrupted: false,
                path: dir,
            },
            Ok(None) | Err(_) => BackupSummary {
                id: id.clone(),
                path: dir,
                timestamp: None,
                metadata: None,
                file_count: 0,
                total_size: 0,
                valid: false,
                corrupted: true,
            },
        }
    }

    // -- retention ----------------------------------------------------------

    /// Delete backups that are older than `max_age_days` AND outside the
    /// `keep_count` most recent. Backups without a readable manifest are
    /// left for [`Self::purge_corrupted_backups`].
    pub fn cleanup_old_backups(
        &self,
        max_age_days: u32,
        keep_count: usize,
    ) -> Result<CleanupReport, BackupError> {
        let all = self.list_available_backups()?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));

        let mut report = CleanupReport::default();
        let dated = all.iter().filter_map(|b| b.timestamp.map(|ts| (b, ts)));
        for (backup, ts) in dated.skip(keep_count) {
            if ts >= cutoff {
                continue;
            }
            std::fs::remove_dir_all(&backup.path).map_err(|e| io_err(&backup.path, e))?;
            tracing::info!("deleted old backup {}", backup.id);
            report.deleted_backups.push(backup.id.clone());
        }
        report.deleted = report.deleted_backups.len();
        report.remaining = all.len() - report.deleted;
        Ok(report)
    }

    /// Delete every backup that fails validation. Valid backups are never
    /// touched.
    pub fn purge_corrupted_backups(&self) -> Result<Vec<BackupId>, BackupError> {
        let mut purged = Vec::new();
        for backup in self.list_available_backups()? {
            if backup.valid {
                continue;
            }
            std::fs::remove_dir_all(&backup.path).map_err(|e| io_err(&backup.path, e))?;
            tracing::warn!("purged corrupted backup {}", backup.id);
            purged.push(backup.id);
        }
        Ok(purged)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// `backup-2026-10-18T09-15-02-417Z`
fn backup_id_for(ts: DateTime<Utc>) -> BackupId {
    BackupId(ts.format("backup-%Y-%m-%dT%H-%M-%S-%3fZ").to_string())
}

/// Resolve the stored copy of `entry` inside backup `dir`.
pub(crate) fn entry_source(
    id: &BackupId,
    dir: &Path,
    entry: &FileEntry,
) -> Result<PathBuf, BackupError> {
    let escaping = || BackupError::EscapingPath {
        id: id.clone(),
        path: entry.backup_path.clone(),
    };
    let source = join_relative(dir, &entry.backup_path).ok_or_else(escaping)?;
    if !source.starts_with(dir.join(FILES_DIR)) {
        return Err(escaping());
    }
    Ok(source)
}

fn verify_entry(id: &BackupId, dir: &Path, entry: &FileEntry) -> Result<(), BackupError> {
    if join_relative(Path::new(""), &entry.relative_path).is_none() {
        return Err(BackupError::EscapingPath {
            id: id.clone(),
            path: entry.relative_path.clone(),
        });
    }
    let source = entry_source(id, dir, entry)?;
    let meta = match std::fs::metadata(&source) {
        Ok(m) if m.is_file() => m,
        _ => {
            return Err(BackupError::FileMissing {
                id: id.clone(),
                path: entry.relative_path.clone(),
            })
        }
    };
    if meta.len() != entry.size {
        return Err(BackupError::SizeMismatch {
            id: id.clone(),
            path: entry.relative_path.clone(),
            expected: entry.size,
            actual: meta.len(),
        });
    }
    let (checksum, _) = sha256_file(&source).map_err(|e| io_err(&source, e))?;
    if checksum != entry.checksum {
        return Err(BackupError::ChecksumMismatch {
            id: id.clone(),
            path: entry.relative_path.clone(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
