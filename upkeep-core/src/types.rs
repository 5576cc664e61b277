//! Domain types shared by the backup, template, and update crates.
//!
//! Path classification ([`FileKind::from_path`], [`FileCategory::from_path`])
//! works on `/`-separated paths relative to the workspace root.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a backup directory, e.g. `backup-2026-10-18T09-15-02-417Z`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(pub String);

impl BackupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BackupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BackupId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What a managed file is, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Agent,
    Hook,
    Template,
    Other,
}

impl FileKind {
    pub fn from_path(path: &str) -> Self {
        if path.ends_with(".md") {
            FileKind::Agent
        } else if path.ends_with(".yml") || path.ends_with(".yaml") {
            FileKind::Hook
        } else if path.contains("template") {
            FileKind::Template
        } else {
            FileKind::Other
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Agent => write!(f, "agent"),
            FileKind::Hook => write!(f, "hook"),
            FileKind::Template => write!(f, "template"),
            FileKind::Other => write!(f, "other"),
        }
    }
}

/// Grouping used when presenting an update analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Agents,
    Hooks,
    Templates,
    Core,
}

impl FileCategory {
    pub fn from_path(path: &str) -> Self {
        let has_dir = |dir: &str| path.starts_with(&format!("{dir}/")) || path.contains(&format!("/{dir}/"));
        if has_dir("agents") {
            FileCategory::Agents
        } else if has_dir("hooks") {
            FileCategory::Hooks
        } else if has_dir("templates") {
            FileCategory::Templates
        } else {
            FileCategory::Core
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileCategory::Agents => write!(f, "agents"),
            FileCategory::Hooks => write!(f, "hooks"),
            FileCategory::Templates => write!(f, "templates"),
            FileCategory::Core => write!(f, "core"),
        }
    }
}

/// Classified change for a single managed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Update,
    Create,
    Delete,
    Skip,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateAction::Update => write!(f, "update"),
            UpdateAction::Create => write!(f, "create"),
            UpdateAction::Delete => write!(f, "delete"),
            UpdateAction::Skip => write!(f, "skip"),
        }
    }
}

/// Heuristic risk tier. Ordered so `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// An upstream template release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRelease {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zipball_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TemplateRelease {
    /// A release known only by its version (e.g. rebuilt from the cache).
    pub fn from_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: None,
            published_at: None,
            tarball_url: None,
            zipball_url: None,
            notes: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
