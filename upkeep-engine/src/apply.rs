//! Applying consented decisions to the workspace.
//!
//! Every file is handled independently: a failure is recorded in that
//! file's [`FileUpdateOutcome`] and the batch carries on.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use upkeep_core::fsutil::{atomic_write, join_relative};
use upkeep_core::MetadataManager;
use upkeep_templates::TemplateManager;

use crate::analysis::FileUpdateDecision;
use crate::consent::Resolution;
use crate::error::{io_err, UpdateError};
use crate::merge;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppliedAction {
    Created,
    Updated,
    Merged,
    Deleted,
    Skipped,
    /// Unshipped file left in place.
    Preserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdateOutcome {
    pub file_path: String,
    pub action: AppliedAction,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// User regions were appended because the template lacked their markers.
    pub conflict: bool,
    /// The written file carries custom-section markers.
    pub merge_capable: bool,
}

impl FileUpdateOutcome {
    fn ok(path: &str, action: AppliedAction, result: String) -> Self {
        Self {
            file_path: path.to_string(),
            action,
            success: true,
            result: Some(result),
            error: None,
            conflict: false,
            merge_capable: false,
        }
    }

    fn failed(path: &str, action: AppliedAction, error: &UpdateError) -> Self {
        Self {
            file_path: path.to_string(),
            action,
            success: false,
            result: None,
            error: Some(error.to_string()),
            conflict: false,
            merge_capable: false,
        }
    }

    /// The file now holds new content.
    pub fn wrote(&self) -> bool {
        self.success
            && matches!(
                self.action,
                AppliedAction::Created | AppliedAction::Updated | AppliedAction::Merged
            )
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

pub(crate) struct Applier<'a> {
    pub project_root: &'a Path,
    pub templates: &'a TemplateManager,
    pub metadata: &'a MetadataManager,
    pub version: &'a str,
    pub batch_size: usize,
}

impl Applier<'_> {
    pub fn apply(&self, plan: &[(FileUpdateDecision, Resolution)]) -> Vec<FileUpdateOutcome> {
        let mut outcomes = Vec::with_capacity(plan.len());
        let batches = plan.chunks(self.batch_size.max(1));
        let total = batches.len();
        for (n, batch) in batches.enumerate() {
            tracing::debug!("applying batch {}/{total} ({} files)", n + 1, batch.len());
            for (decision, resolution) in batch {
                let outcome = self.apply_one(&decision.file_path, *resolution);
                if outcome.success {
                    self.record_metadata(&outcome);
                } else {
                    tracing::warn!(
                        "update of {} failed: {}",
                        outcome.file_path,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn apply_one(&self, path: &str, resolution: Resolution) -> FileUpdateOutcome {
        let planned = match resolution {
            Resolution::Create => AppliedAction::Created,
            Resolution::Overwrite => AppliedAction::Updated,
            Resolution::Merge => AppliedAction::Merged,
            Resolution::Delete => AppliedAction::Deleted,
            Resolution::Preserve => {
                return FileUpdateOutcome::ok(
                    path,
                    AppliedAction::Preserved,
                    "kept; not shipped by the new release".to_string(),
                )
            }
            Resolution::Skip => {
                return FileUpdateOutcome::ok(path, AppliedAction::Skipped, "skipped".to_string())
            }
        };

        let result = self.target(path).and_then(|target| match resolution {
            Resolution::Delete => self.delete(&target),
            Resolution::Merge => self.merge(path, &target),
            _ => self.overwrite(path, &target, planned),
        });
        match result {
            Ok(outcome) => outcome.at(path),
            Err(e) => FileUpdateOutcome::failed(path, planned, &e),
        }
    }

    fn target(&self, path: &str) -> Result<PathBuf, UpdateError> {
        join_relative(self.project_root, path).ok_or_else(|| UpdateError::EscapingPath(path.to_string()))
    }

    fn template_bytes(&self, path: &str) -> Result<Vec<u8>, UpdateError> {
        let source = self
            .templates
            .template_file_path(self.version, path)
            .ok_or_else(|| UpdateError::MissingTemplateFile {
                version: self.version.to_string(),
                path: path.to_string(),
            })?;
        std::fs::read(&source).map_err(|e| io_err(&source, e))
    }

    fn overwrite(&self, path: &str, target: &Path, action: AppliedAction) -> Result<Applied, UpdateError> {
        let bytes = self.template_bytes(path)?;
        atomic_write(target, &bytes).map_err(|e| io_err(target, e))?;
        tracing::info!("wrote: {}", target.display());
        let merge_capable = std::str::from_utf8(&bytes).is_ok_and(merge::is_merge_capable);
        Ok(Applied {
            action,
            result: format!("{} bytes from template {}", bytes.len(), self.version),
            conflict: false,
            merge_capable,
        })
    }

    fn merge(&self, path: &str, target: &Path) -> Result<Applied, UpdateError> {
        let existing = match std::fs::read_to_string(target) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return self.overwrite(path, target, AppliedAction::Created);
            }
            Err(e) => return Err(io_err(target, e)),
        };
        let bytes = self.template_bytes(path)?;
        let template = String::from_utf8_lossy(&bytes);
        let merged = merge::smart_merge(&existing, &template).map_err(|source| UpdateError::Markers {
            path: path.to_string(),
            source,
        })?;
        atomic_write(target, merged.content.as_bytes()).map_err(|e| io_err(target, e))?;
        tracing::info!(
            "merged: {} ({} custom blocks kept)",
            target.display(),
            merged.preserved_blocks
        );
        let result = if merged.conflict {
            format!(
                "{} custom blocks kept; template lacks matching markers, blocks appended",
                merged.preserved_blocks
            )
        } else {
            format!("{} custom blocks kept", merged.preserved_blocks)
        };
        Ok(Applied {
            action: AppliedAction::Merged,
            result,
            conflict: merged.conflict,
            merge_capable: merge::is_merge_capable(&merged.content),
        })
    }

    fn delete(&self, target: &Path) -> Result<Applied, UpdateError> {
        match std::fs::remove_file(target) {
            Ok(()) => tracing::info!("deleted: {}", target.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(target, e)),
        }
        Ok(Applied {
            action: AppliedAction::Deleted,
            result: "removed".to_string(),
            conflict: false,
            merge_capable: false,
        })
    }

    /// Registry bookkeeping is best-effort; the file change already happened.
    fn record_metadata(&self, outcome: &FileUpdateOutcome) {
        let recorded = if outcome.wrote() {
            self.metadata
                .record_installed_file(self.project_root, &outcome.file_path, self.version)
        } else if outcome.action == AppliedAction::Deleted {
            self.metadata.forget_file(&outcome.file_path)
        } else {
            return;
        };
        if let Err(e) = recorded {
            tracing::warn!("could not record {} in metadata: {e}", outcome.file_path);
        }
    }
}

struct Applied {
    action: AppliedAction,
    result: String,
    conflict: bool,
    merge_capable: bool,
}

impl Applied {
    fn at(self, path: &str) -> FileUpdateOutcome {
        FileUpdateOutcome {
            file_path: path.to_string(),
            action: self.action,
            success: true,
            result: Some(self.result),
            error: None,
            conflict: self.conflict,
            merge_capable: self.merge_capable,
        }
    }
}
