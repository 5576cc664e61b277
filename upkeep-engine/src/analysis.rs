//! Pre-update analysis: what would change, and how risky it is.

use std::path::Path;

use serde::Serialize;

use upkeep_core::{FileCategory, FileKind, MetadataManager, RiskLevel, UpdateAction};
use upkeep_templates::{ReleaseOrigin, TemplateComparison, TemplateFile, TemplateManager};

use crate::merge;

// ---------------------------------------------------------------------------
// Risk policy
// ---------------------------------------------------------------------------

/// Facts a [`RiskPolicy`] scores.
#[derive(Debug, Clone, Copy)]
pub struct RiskInput<'a> {
    pub path: &'a str,
    pub action: UpdateAction,
    /// Larger of the current and template sizes.
    pub size: u64,
    pub user_modified: bool,
    pub merge_capable: bool,
}

pub trait RiskPolicy {
    fn assess(&self, input: &RiskInput<'_>) -> RiskLevel;
}

/// Size tiers, raised by user edits and deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRiskPolicy {
    pub medium_bytes: u64,
    pub high_bytes: u64,
}

impl Default for SizeRiskPolicy {
    fn default() -> Self {
        Self {
            medium_bytes: 10 * 1024,
            high_bytes: 50 * 1024,
        }
    }
}

impl RiskPolicy for SizeRiskPolicy {
    fn assess(&self, input: &RiskInput<'_>) -> RiskLevel {
        match input.action {
            UpdateAction::Delete => RiskLevel::High,
            UpdateAction::Create | UpdateAction::Skip => RiskLevel::Low,
            UpdateAction::Update => {
                if input.size > self.high_bytes {
                    RiskLevel::High
                } else if input.size > self.medium_bytes
                    || input.user_modified
                    || input.merge_capable
                {
                    RiskLevel::Medium
                } else {
                    RiskLevel::Low
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdateDecision {
    pub file_path: String,
    pub file_name: String,
    pub category: FileCategory,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub action: UpdateAction,
    pub risk: RiskLevel,
    pub description: String,
    pub merge_capable: bool,
    pub user_modified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UpdateCategories {
    pub agents: Vec<FileUpdateDecision>,
    pub hooks: Vec<FileUpdateDecision>,
    pub templates: Vec<FileUpdateDecision>,
    pub core: Vec<FileUpdateDecision>,
}

impl UpdateCategories {
    pub fn push(&mut self, decision: FileUpdateDecision) {
        match decision.category {
            FileCategory::Agents => self.agents.push(decision),
            FileCategory::Hooks => self.hooks.push(decision),
            FileCategory::Templates => self.templates.push(decision),
            FileCategory::Core => self.core.push(decision),
        }
    }

    /// Every decision, agents first, then hooks, templates, core.
    pub fn iter(&self) -> impl Iterator<Item = &FileUpdateDecision> {
        self.agents
            .iter()
            .chain(&self.hooks)
            .chain(&self.templates)
            .chain(&self.core)
    }

    pub fn len(&self) -> usize {
        self.agents.len() + self.hooks.len() + self.templates.len() + self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the categories selected by the scoping flags.
    pub fn scope(&mut self, agents_only: bool, hooks_only: bool) {
        if agents_only {
            self.hooks.clear();
            self.templates.clear();
            self.core.clear();
        } else if hooks_only {
            self.agents.clear();
            self.templates.clear();
            self.core.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskNote {
    pub level: RiskLevel,
    pub description: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnalysis {
    pub current_version: Option<String>,
    pub latest_version: String,
    pub release_source: ReleaseOrigin,
    pub has_updates: bool,
    pub update_categories: UpdateCategories,
    pub risks: Vec<RiskNote>,
    pub recommendations: Vec<String>,
}

impl UpdateAnalysis {
    pub fn decisions(&self) -> impl Iterator<Item = &FileUpdateDecision> {
        self.update_categories.iter()
    }

    pub fn highest_risk(&self) -> RiskLevel {
        self.decisions().map(|d| d.risk).max().unwrap_or_default()
    }

    /// Recompute risks and recommendations from the current decisions.
    pub(crate) fn summarize(&mut self) {
        self.risks = assess_risks(self);
        self.recommendations = recommendations(self);
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

pub(crate) struct Classifier<'a> {
    pub project_root: &'a Path,
    pub templates: &'a TemplateManager,
    pub metadata: &'a MetadataManager,
    pub policy: &'a dyn RiskPolicy,
    pub version: &'a str,
}

impl Classifier<'_> {
    /// different -> update, missing -> create, extra -> delete.
    pub fn classify(&self, comparison: &TemplateComparison) -> UpdateCategories {
        let mut categories = UpdateCategories::default();
        for file in &comparison.different {
            categories.push(self.decide(file, UpdateAction::Update));
        }
        for file in &comparison.missing {
            categories.push(self.decide(file, UpdateAction::Create));
        }
        for file in &comparison.extra {
            categories.push(self.decide(file, UpdateAction::Delete));
        }
        categories
    }

    fn decide(&self, file: &TemplateFile, action: UpdateAction) -> FileUpdateDecision {
        let project_path = self.project_root.join(&file.path);
        let existing = std::fs::read_to_string(&project_path).ok();
        let existing_size = std::fs::metadata(&project_path).map(|m| m.len()).unwrap_or(0);
        let template_size = self
            .templates
            .template_file_path(self.version, &file.path)
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        let merge_capable = existing.as_deref().is_some_and(merge::is_merge_capable);
        let user_modified = match self
            .metadata
            .detect_user_modifications(self.project_root, &file.path)
        {
            Ok(status) => status.is_modified(),
            Err(e) => {
                tracing::debug!("cannot check {} for edits: {e}", file.path);
                false
            }
        };

        let risk = self.policy.assess(&RiskInput {
            path: &file.path,
            action,
            size: existing_size.max(template_size),
            user_modified,
            merge_capable,
        });

        let mut description = match action {
            UpdateAction::Update => format!("Template changes available for {}", file.path),
            UpdateAction::Create => format!("New {} available: {}", file.kind, file.path),
            UpdateAction::Delete => format!("{} is not shipped by {}", file.path, self.version),
            UpdateAction::Skip => format!("{} is unchanged", file.path),
        };
        if user_modified {
            description.push_str(" (locally modified)");
        }
        if merge_capable && action == UpdateAction::Update {
            description.push_str("; custom sections will be preserved");
        }

        FileUpdateDecision {
            file_name: file
                .path
                .rsplit('/')
                .next()
                .unwrap_or(&file.path)
                .to_string(),
            file_path: file.path.clone(),
            category: file.category,
            kind: file.kind,
            action,
            risk,
            description,
            merge_capable,
            user_modified,
        }
    }
}

fn matching(analysis: &UpdateAnalysis, pred: impl Fn(&FileUpdateDecision) -> bool) -> Vec<String> {
    analysis
        .decisions()
        .filter(|d| pred(d))
        .map(|d| d.file_path.clone())
        .collect()
}

fn assess_risks(analysis: &UpdateAnalysis) -> Vec<RiskNote> {
    let mut risks = Vec::new();

    let high = matching(analysis, |d| {
        d.risk == RiskLevel::High && d.action != UpdateAction::Delete
    });
    if !high.is_empty() {
        risks.push(RiskNote {
            level: RiskLevel::High,
            description: format!("{} files have high-risk changes", high.len()),
            files: high,
        });
    }
    let deletions = matching(analysis, |d| d.action == UpdateAction::Delete);
    if !deletions.is_empty() {
        risks.push(RiskNote {
            level: RiskLevel::High,
            description: format!(
                "{} managed files are no longer shipped; they are kept unless you approve each deletion",
                deletions.len()
            ),
            files: deletions,
        });
    }
    let overwritten = matching(analysis, |d| {
        d.action == UpdateAction::Update && d.user_modified && !d.merge_capable
    });
    if !overwritten.is_empty() {
        risks.push(RiskNote {
            level: RiskLevel::Medium,
            description: format!(
                "{} locally modified files have no custom-section markers and would be overwritten",
                overwritten.len()
            ),
            files: overwritten,
        });
    }
    risks
}

fn recommendations(analysis: &UpdateAnalysis) -> Vec<String> {
    let mut out = Vec::new();
    if analysis.release_source != ReleaseOrigin::Remote {
        out.push("Release data came from the local cache; upstream could not be reached".to_string());
    }
    if analysis.risks.iter().any(|r| r.level == RiskLevel::High) {
        out.push("Review high-risk changes carefully before proceeding".to_string());
    }
    if analysis.update_categories.len() > 10 {
        out.push("Consider updating in smaller batches with --agents-only or --hooks-only".to_string());
    }
    out.push("Backup will be created automatically for safety".to_string());
    out
}
