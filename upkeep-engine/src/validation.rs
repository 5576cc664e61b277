//! Post-update structural checks.

use std::path::Path;

use serde::Serialize;

use upkeep_core::fsutil::join_relative;
use upkeep_core::FileCategory;

use crate::apply::FileUpdateOutcome;
use crate::merge;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationReport {
    pub success: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub critical: Vec<String>,
}

impl ValidationReport {
    pub fn has_critical(&self) -> bool {
        !self.critical.is_empty()
    }
}

/// Re-read every written file and check the workspace layout.
///
/// Failed applies are errors. A written file that cannot be read back is
/// critical, as is a missing `.claude/` once agent or hook files were
/// applied.
pub fn validate_updates(project_root: &Path, outcomes: &[FileUpdateOutcome]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for outcome in outcomes {
        if !outcome.success {
            report.errors.push(format!(
                "{}: {}",
                outcome.file_path,
                outcome.error.as_deref().unwrap_or("update failed")
            ));
            continue;
        }
        if !outcome.wrote() {
            continue;
        }
        let Some(path) = join_relative(project_root, &outcome.file_path) else {
            report
                .critical
                .push(format!("{}: path leaves the project root", outcome.file_path));
            continue;
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                report
                    .critical
                    .push(format!("{} is missing or unreadable: {e}", outcome.file_path));
                continue;
            }
        };
        if outcome.merge_capable || merge::has_custom_markers(&content) {
            if let Err(e) = merge::extract_custom_blocks(&content) {
                report
                    .errors
                    .push(format!("{}: unbalanced customization markers: {e}", outcome.file_path));
            }
        }
        if merge::has_conflict_markers(&content) {
            report
                .warnings
                .push(format!("{} contains unresolved conflict markers", outcome.file_path));
        }
        if outcome.conflict {
            report.warnings.push(format!(
                "{}: custom blocks were appended at the end; review their placement",
                outcome.file_path
            ));
        }
    }

    let touched_claude = outcomes.iter().any(|o| {
        o.wrote()
            && matches!(
                FileCategory::from_path(&o.file_path),
                FileCategory::Agents | FileCategory::Hooks
            )
    });
    let claude = project_root.join(".claude");
    if touched_claude && !claude.is_dir() {
        report.critical.push(".claude directory is missing".to_string());
    } else if claude.is_dir() {
        for (dir, label) in [("agents", "agents"), ("hooks/examples", "hook examples")] {
            if !claude.join(dir).is_dir() {
                report
                    .warnings
                    .push(format!(".claude/{dir} is missing; no {label} installed"));
            }
        }
    }

    report.success = report.critical.is_empty() && report.errors.is_empty();
    if report.success {
        tracing::info!("validation passed ({} warnings)", report.warnings.len());
    } else {
        tracing::warn!(
            "validation found {} errors and {} critical issues",
            report.errors.len(),
            report.critical.len()
        );
    }
    report
}
