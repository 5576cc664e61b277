//! User consent: which analysed changes may be applied, and how.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use upkeep_core::UpdateAction;

use crate::analysis::{FileUpdateDecision, UpdateAnalysis};
use crate::error::UpdateError;

/// Per-file answer to a consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentAction {
    /// Merge when the file has custom sections, overwrite otherwise.
    #[default]
    Auto,
    /// Replace with the template as-is.
    Update,
    SmartMerge,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentPolicy {
    pub cancelled: bool,
    pub global: GlobalConsent,
    /// Per-file overrides keyed by project-relative path.
    pub files: BTreeMap<String, ConsentAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConsent {
    pub default_action: ConsentAction,
}

impl ConsentPolicy {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn with_default(mut self, action: ConsentAction) -> Self {
        self.global.default_action = action;
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, action: ConsentAction) -> Self {
        self.files.insert(path.into(), action);
        self
    }

    pub fn action_for(&self, path: &str) -> ConsentAction {
        self.files
            .get(path)
            .copied()
            .unwrap_or(self.global.default_action)
    }

    /// How `decision` should be carried out under this policy.
    ///
    /// Deletion needs an explicit per-file `Update`; the default action
    /// never removes a file.
    pub fn resolve(&self, decision: &FileUpdateDecision) -> Resolution {
        let explicit = self.files.get(&decision.file_path).copied();
        let action = explicit.unwrap_or(self.global.default_action);
        if action == ConsentAction::Skip {
            return Resolution::Skip;
        }
        match decision.action {
            UpdateAction::Skip => Resolution::Skip,
            UpdateAction::Create => Resolution::Create,
            UpdateAction::Delete => match explicit {
                Some(ConsentAction::Update) => Resolution::Delete,
                _ => Resolution::Preserve,
            },
            UpdateAction::Update => match action {
                ConsentAction::Update => Resolution::Overwrite,
                ConsentAction::SmartMerge => Resolution::Merge,
                ConsentAction::Auto if decision.merge_capable => Resolution::Merge,
                _ => Resolution::Overwrite,
            },
        }
    }
}

/// Concrete step for one file after consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Create,
    Overwrite,
    Merge,
    Delete,
    /// Leave an unshipped file in place.
    Preserve,
    Skip,
}

/// Asks someone (or something) which changes to apply.
pub trait ConsentProvider {
    fn gather(&mut self, analysis: &UpdateAnalysis) -> Result<ConsentPolicy, UpdateError>;
}

/// Accepts every change with [`ConsentAction::Auto`]. Used for `--force`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceConsent;

impl ConsentProvider for ForceConsent {
    fn gather(&mut self, _analysis: &UpdateAnalysis) -> Result<ConsentPolicy, UpdateError> {
        Ok(ConsentPolicy::auto())
    }
}

/// Returns a pre-built policy.
#[derive(Debug, Clone, Default)]
pub struct FixedConsent(pub ConsentPolicy);

impl ConsentProvider for FixedConsent {
    fn gather(&mut self, _analysis: &UpdateAnalysis) -> Result<ConsentPolicy, UpdateError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upkeep_core::{FileCategory, FileKind, RiskLevel};

    fn decision(path: &str, action: UpdateAction, merge_capable: bool) -> FileUpdateDecision {
        FileUpdateDecision {
            file_path: path.into(),
            file_name: path.into(),
            category: FileCategory::from_path(path),
            kind: FileKind::from_path(path),
            action,
            risk: RiskLevel::Low,
            description: String::new(),
            merge_capable,
            user_modified: false,
        }
    }

    #[test]
    fn auto_merges_only_merge_capable_files() {
        let policy = ConsentPolicy::auto();
        assert_eq!(
            policy.resolve(&decision("a.md", UpdateAction::Update, true)),
            Resolution::Merge
        );
        assert_eq!(
            policy.resolve(&decision("b.md", UpdateAction::Update, false)),
            Resolution::Overwrite
        );
        assert_eq!(
            policy.resolve(&decision("c.md", UpdateAction::Create, false)),
            Resolution::Create
        );
    }

    #[test]
    fn deletion_requires_explicit_per_file_update() {
        let old = decision(".claude/agents/old.md", UpdateAction::Delete, false);
        let blanket = ConsentPolicy::auto().with_default(ConsentAction::Update);
        assert_eq!(blanket.resolve(&old), Resolution::Preserve);
        assert_eq!(ConsentPolicy::auto().resolve(&old), Resolution::Preserve);

        let explicit = ConsentPolicy::auto().with_file(".claude/agents/old.md", ConsentAction::Update);
        assert_eq!(explicit.resolve(&old), Resolution::Delete);
    }

    #[test]
    fn per_file_skip_overrides_default() {
        let policy = ConsentPolicy::auto().with_file("a.md", ConsentAction::Skip);
        assert_eq!(
            policy.resolve(&decision("a.md", UpdateAction::Update, true)),
            Resolution::Skip
        );
        assert_eq!(policy.action_for("other.md"), ConsentAction::Auto);
    }

    #[test]
    fn policy_reads_kebab_case_json() {
        let policy: ConsentPolicy = serde_json::from_str(
            r#"{"cancelled":false,"global":{"defaultAction":"smart-merge"},"files":{"x.md":"skip"}}"#,
        )
        .unwrap();
        assert_eq!(policy.global.default_action, ConsentAction::SmartMerge);
        assert_eq!(policy.action_for("x.md"), ConsentAction::Skip);
    }
}
