//! The set of files a template release manages.

use serde::{Deserialize, Serialize};

use upkeep_core::config::TemplateConfig;
use upkeep_core::{FileCategory, FileKind};

/// Files fetched for every release unless configuration overrides the list.
pub const DEFAULT_TEMPLATE_FILES: &[&str] = &[
    ".claude/agents/genie-analyzer.md",
    ".claude/agents/genie-dev-planner.md",
    ".claude/agents/genie-dev-designer.md",
    ".claude/agents/genie-dev-coder.md",
    ".claude/agents/genie-dev-fixer.md",
    ".claude/agents/genie-testing-maker.md",
    ".claude/agents/genie-testing-fixer.md",
    ".claude/agents/genie-quality-ruff.md",
    ".claude/agents/genie-quality-mypy.md",
    ".claude/agents/genie-claudemd.md",
    ".claude/agents/genie-clone.md",
    ".claude/agents/genie-agent-creator.md",
    ".claude/agents/genie-agent-enhancer.md",
    ".claude/hooks/examples/pre-commit.yml",
    ".claude/hooks/examples/post-merge.yml",
    ".claude/hooks/examples/pre-push.yml",
    "templates/CLAUDE.md.template",
    "CLAUDE.md",
];

/// Path prefixes owned by templates. A project file under one of these that
/// the release does not ship is an "extra" file.
const MANAGED_PREFIXES: &[&str] = &[".claude/agents/", ".claude/hooks/examples/", "templates/"];

const MANAGED_FILES: &[&str] = &["CLAUDE.md"];

/// Leftovers of atomic writes and restores that sit next to managed files.
const SCRATCH_SUFFIXES: &[&str] = &[".upkeep.tmp", ".upkeep.restore"];
const RESTORE_SIBLING: &str = ".restore-backup.";

/// Directories never walked when looking for extra files.
pub(crate) const SKIP_DIRS: &[&str] = &["node_modules", ".git", ".venv", "__pycache__", ".upkeep"];

/// A catalog entry with its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFile {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub category: FileCategory,
}

impl TemplateFile {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            kind: FileKind::from_path(&path),
            category: FileCategory::from_path(&path),
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateCatalog {
    files: Vec<String>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE_FILES.iter().map(|s| s.to_string()).collect())
    }
}

impl TemplateCatalog {
    pub fn new(files: Vec<String>) -> Self {
        Self { files }
    }

    /// The configured list, or the built-in one when the config leaves it empty.
    pub fn from_config(config: &TemplateConfig) -> Self {
        if config.files.is_empty() {
            Self::default()
        } else {
            Self::new(config.files.clone())
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.files
    }

    pub fn entries(&self) -> Vec<TemplateFile> {
        self.files.iter().map(TemplateFile::new).collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.iter().any(|f| f == path)
    }
}

/// Whether `path` (workspace-relative, `/`-separated) lives under a
/// template-managed location.
pub fn is_template_managed(path: &str) -> bool {
    let scratch = path.contains(RESTORE_SIBLING)
        || SCRATCH_SUFFIXES.iter().any(|suffix| path.ends_with(suffix));
    !scratch
        && (MANAGED_FILES.contains(&path)
            || MANAGED_PREFIXES.iter().any(|prefix| path.starts_with(prefix)))
}
