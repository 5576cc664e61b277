//! Conflict-safe restore.
//!
//! Restore runs in two passes so a failure while reading the backup never
//! leaves the workspace half-restored:
//!
//! 1. **Stage**: copy every entry to a `<dest>.upkeep.restore` sibling and
//!    verify its checksum on the way through.
//! 2. **Commit**: move any existing destination aside to
//!    `<name>.restore-backup.<ms>` (unless `force`), then rename the staged
//!    file into place.
//!
//! Without a target root every file returns to the absolute path it was
//! backed up from. A target root relocates the backup, keeping the
//! project-relative layout.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use upkeep_core::checksum::copy_with_checksum;
use upkeep_core::fsutil::join_relative;
use upkeep_core::BackupId;

use crate::error::{io_err, BackupError};
use crate::manager::{entry_source, BackupManager};
use crate::manifest::{BackupManifest, FileEntry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    pub dry_run: bool,
    /// Overwrite existing destinations instead of preserving them.
    pub force: bool,
}

/// One file a dry-run restore would write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePreview {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    /// Always `"restore"`.
    pub action: &'static str,
    pub overwrites: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedFile {
    pub original: PathBuf,
    pub moved_to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup_id: BackupId,
    /// `None` when files went back to their original locations.
    pub target_root: Option<PathBuf>,
    pub restored: Vec<PathBuf>,
    pub preserved: Vec<PreservedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Preview(Vec<RestorePreview>),
    Restored(RestoreReport),
}

struct Staged<'a> {
    entry: &'a FileEntry,
    staged: PathBuf,
    dest: PathBuf,
}

impl BackupManager {
    /// Restore backup `id` to the files' original paths, or under
    /// `target_root` when one is given.
    ///
    /// The backup is always validated first; a missing or damaged backup
    /// fails with [`BackupError::InvalidOrCorrupted`].
    pub fn restore_from_backup(
        &self,
        id: &BackupId,
        target_root: Option<&Path>,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome, BackupError> {
        let manifest = match self.verify(id) {
            Ok(m) => m,
            Err(e @ BackupError::EscapingPath { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!("refusing to restore {id}: {e}");
                return Err(BackupError::InvalidOrCorrupted { id: id.clone() });
            }
        };
        let dir = self
            .backup_dir(id)
            .ok_or_else(|| BackupError::InvalidOrCorrupted { id: id.clone() })?;

        if options.dry_run {
            return preview(id, &dir, target_root, &manifest).map(RestoreOutcome::Preview);
        }

        let staged = stage_all(id, &dir, target_root, &manifest)?;
        let report = commit_all(id, target_root, staged, options.force)?;
        match target_root {
            Some(root) => tracing::info!(
                "restored {} files from {id} into {}",
                report.restored.len(),
                root.display()
            ),
            None => tracing::info!("restored {} files from {id}", report.restored.len()),
        }
        Ok(RestoreOutcome::Restored(report))
    }
}

fn destination_for(
    id: &BackupId,
    target: Option<&Path>,
    entry: &FileEntry,
) -> Result<PathBuf, BackupError> {
    match target {
        Some(root) => {
            join_relative(root, &entry.relative_path).ok_or_else(|| BackupError::EscapingPath {
                id: id.clone(),
                path: entry.relative_path.clone(),
            })
        }
        None => {
            let original = &entry.original_path;
            let plain = original
                .components()
                .all(|c| !matches!(c, Component::ParentDir | Component::CurDir));
            if original.is_absolute() && plain && original.file_name().is_some() {
                Ok(original.clone())
            } else {
                Err(BackupError::EscapingPath {
                    id: id.clone(),
                    path: original.display().to_string(),
                })
            }
        }
    }
}

fn preview(
    id: &BackupId,
    dir: &Path,
    target: Option<&Path>,
    manifest: &BackupManifest,
) -> Result<Vec<RestorePreview>, BackupError> {
    manifest
        .files
        .iter()
        .map(|entry| {
            let destination = destination_for(id, target, entry)?;
            Ok(RestorePreview {
                source: entry_source(id, dir, entry)?,
                overwrites: destination.exists(),
                destination,
                size: entry.size,
                action: "restore",
            })
        })
        .collect()
}

fn staging_path(dest: &Path) -> PathBuf {
    PathBuf::from(format!("{}.upkeep.restore", dest.display()))
}

fn discard(staged: &[Staged<'_>]) {
    for s in staged {
        let _ = std::fs::remove_file(&s.staged);
    }
}

fn stage_all<'a>(
    id: &BackupId,
    dir: &Path,
    target: Option<&Path>,
    manifest: &'a BackupManifest,
) -> Result<Vec<Staged<'a>>, BackupError> {
    let mut staged: Vec<Staged<'a>> = Vec::with_capacity(manifest.files.len());
    for entry in &manifest.files {
        match stage_one(id, dir, target, entry) {
            Ok(s) => staged.push(s),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
    }
    Ok(staged)
}

fn stage_one<'a>(
    id: &BackupId,
    dir: &Path,
    target: Option<&Path>,
    entry: &'a FileEntry,
) -> Result<Staged<'a>, BackupError> {
    let source = entry_source(id, dir, entry)?;
    let dest = destination_for(id, target, entry)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let staged = staging_path(&dest);

    let copied = (|| {
        let mut reader = File::open(&source)?;
        let mut writer = BufWriter::new(File::create(&staged)?);
        copy_with_checksum(&mut reader, &mut writer)
    })();
    let checksum = match copied {
        Ok((checksum, _)) => checksum,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(io_err(&source, e));
        }
    };
    if checksum != entry.checksum {
        let _ = std::fs::remove_file(&staged);
        return Err(BackupError::ChecksumMismatch {
            id: id.clone(),
            path: entry.relative_path.clone(),
        });
    }
    tracing::debug!("staged {}", entry.relative_path);
    Ok(Staged { entry, staged, dest })
}

fn commit_all(
    id: &BackupId,
    target: Option<&Path>,
    staged: Vec<Staged<'_>>,
    force: bool,
) -> Result<RestoreReport, BackupError> {
    let stamp = Utc::now().timestamp_millis();
    let mut report = RestoreReport {
        backup_id: id.clone(),
        target_root: target.map(Path::to_path_buf),
        restored: Vec::new(),
        preserved: Vec::new(),
    };

    for (idx, s) in staged.iter().enumerate() {
        if let Err(e) = commit_one(s, force, stamp, &mut report) {
            discard(&staged[idx..]);
            return Err(e);
        }
    }
    Ok(report)
}

fn commit_one(
    s: &Staged<'_>,
    force: bool,
    stamp: i64,
    report: &mut RestoreReport,
) -> Result<(), BackupError> {
    if s.dest.exists() && !force {
        let name = s
            .dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let moved_to = s.dest.with_file_name(format!("{name}.restore-backup.{stamp}"));
        std::fs::rename(&s.dest, &moved_to).map_err(|e| io_err(&s.dest, e))?;
        tracing::info!("preserved {} as {}", s.dest.display(), moved_to.display());
        report.preserved.push(PreservedFile {
            original: s.dest.clone(),
            moved_to,
        });
    }
    std::fs::rename(&s.staged, &s.dest).map_err(|e| io_err(&s.dest, e))?;
    tracing::debug!("restored {}", s.entry.relative_path);
    report.restored.push(s.dest.clone());
    Ok(())
}
