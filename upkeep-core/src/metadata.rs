//! Installed-file registry and version state for one workspace.
//!
//! # Storage layout
//!
//! ```text
//! <root>/metadata/
//!   agent-registry.json   (agent name -> FileRecord)
//!   hook-registry.json    (hook name  -> FileRecord)
//!   system-version.json   (installed version + update history)
//! ```
//!
//! A [`FileRecord`]'s `checksum` is the baseline: the content upkeep last
//! installed (or first saw, for files it never wrote). Scans refresh
//! `user_modified` against that baseline without moving it.
//!
//! All writes go through [`crate::fsutil::write_json_atomic`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::error::{io_err, CoreError};
use crate::fsutil::write_json_atomic;
use crate::types::{BackupId, FileCategory};

pub const REGISTRY_FORMAT_VERSION: &str = "1.0.0";

const AGENTS_DIR: &[&str] = &[".claude", "agents"];
const HOOKS_DIR: &[&str] = &[".claude", "hooks", "examples"];

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Which registry document a managed file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Agents,
    Hooks,
}

impl RegistryKind {
    fn file_name(self) -> &'static str {
        match self {
            RegistryKind::Agents => "agent-registry.json",
            RegistryKind::Hooks => "hook-registry.json",
        }
    }

    /// Registry kind and entry name for a workspace-relative path, or `None`
    /// when the path is not tracked by either registry.
    ///
    /// `.claude/hooks/examples/pre-commit.yml` -> `(Hooks, "pre-commit")`,
    /// `.claude/agents/genie-dev-coder.md` -> `(Agents, "genie-dev-coder")`.
    pub fn for_path(relative: &str) -> Option<(RegistryKind, String)> {
        let relative = relative.replace('\\', "/");
        if FileCategory::from_path(&relative) == FileCategory::Hooks {
            let tail = match relative.find("hooks/examples/") {
                Some(idx) => &relative[idx + "hooks/examples/".len()..],
                None => relative.rsplit('/').next().unwrap_or(&relative),
            };
            let name = tail
                .strip_suffix(".yml")
                .or_else(|| tail.strip_suffix(".yaml"))?;
            return Some((RegistryKind::Hooks, name.to_string()));
        }
        if FileCategory::from_path(&relative) == FileCategory::Agents && relative.ends_with(".md") {
            let file = relative.rsplit('/').next().unwrap_or(&relative);
            let name = file.strip_suffix(".md").unwrap_or(file);
            return Some((RegistryKind::Agents, name.to_string()));
        }
        None
    }
}

/// Tracked state of a single managed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub checksum: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_version: Option<String>,
    #[serde(default)]
    pub user_modified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scanned: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// One registry document (agents or hooks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegistry {
    pub version: String,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, FileRecord>,
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_FORMAT_VERSION.to_string(),
            last_update: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    pub to_version: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<BackupId>,
}

/// Installed version plus the history of update attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_history: Vec<UpdateHistoryEntry>,
}

/// Counts returned by [`MetadataManager::scan_existing_files`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub agent_count: usize,
    pub hook_count: usize,
    pub modified_count: usize,
}

/// Result of comparing a file against its registry baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModificationStatus {
    /// No registry entry for this file.
    Untracked,
    Unmodified,
    Modified { recorded: String, current: String },
}

impl ModificationStatus {
    pub fn is_modified(&self) -> bool {
        matches!(self, ModificationStatus::Modified { .. })
    }
}

// ---------------------------------------------------------------------------
// MetadataManager
// ---------------------------------------------------------------------------

/// Reads and writes the metadata documents under `<root>/metadata/`.
#[derive(Debug, Clone)]
pub struct MetadataManager {
    root: PathBuf,
}

impl MetadataManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    fn registry_path(&self, kind: RegistryKind) -> PathBuf {
        self.metadata_dir().join(kind.file_name())
    }

    fn system_version_path(&self) -> PathBuf {
        self.metadata_dir().join("system-version.json")
    }

    /// Create the metadata directory and any missing default documents.
    /// Existing documents are left untouched.
    pub fn initialize_registries(&self) -> Result<(), CoreError> {
        let dir = self.metadata_dir();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        for kind in [RegistryKind::Agents, RegistryKind::Hooks] {
            let path = self.registry_path(kind);
            if !path.exists() {
                write_json_atomic(&path, &FileRegistry::default())?;
            }
        }
        let path = self.system_version_path();
        if !path.exists() {
            write_json_atomic(&path, &SystemVersion::default())?;
        }
        Ok(())
    }

    // -- registries ---------------------------------------------------------

    pub fn load_registry(&self, kind: RegistryKind) -> Result<FileRegistry, CoreError> {
        Ok(read_json_or_default(&self.registry_path(kind))?.unwrap_or_default())
    }

    pub fn save_registry(&self, kind: RegistryKind, registry: &FileRegistry) -> Result<(), CoreError> {
        write_json_atomic(&self.registry_path(kind), registry)
    }

    /// Merge `record` into the entry `name` and bump `last_update`.
    pub fn update_registry(
        &self,
        kind: RegistryKind,
        name: &str,
        record: FileRecord,
    ) -> Result<(), CoreError> {
        let mut registry = self.load_registry(kind)?;
        let now = Utc::now();
        let mut record = record;
        record.last_updated = Some(now);
        registry.entries.insert(name.to_string(), record);
        registry.last_update = now;
        self.save_registry(kind, &registry)
    }

    pub fn update_agent_registry(&self, name: &str, record: FileRecord) -> Result<(), CoreError> {
        self.update_registry(RegistryKind::Agents, name, record)
    }

    pub fn update_hook_registry(&self, name: &str, record: FileRecord) -> Result<(), CoreError> {
        self.update_registry(RegistryKind::Hooks, name, record)
    }

    pub fn get_record(&self, kind: RegistryKind, name: &str) -> Result<Option<FileRecord>, CoreError> {
        Ok(self.load_registry(kind)?.entries.remove(name))
    }

    pub fn get_agent_metadata(&self, name: &str) -> Result<Option<FileRecord>, CoreError> {
        self.get_record(RegistryKind::Agents, name)
    }

    /// Record a file upkeep has just written from template `version`.
    ///
    /// The current content becomes the new baseline. Paths that neither
    /// registry tracks are ignored.
    pub fn record_installed_file(
        &self,
        project_root: &Path,
        relative: &str,
        version: &str,
    ) -> Result<(), CoreError> {
        let Some((kind, name)) = RegistryKind::for_path(relative) else {
            return Ok(());
        };
        let mut record = self.analyze_file(&project_root.join(relative))?;
        record.template_version = Some(version.to_string());
        self.update_registry(kind, &name, record)
    }

    /// Drop a registry entry for a file upkeep removed.
    pub fn forget_file(&self, relative: &str) -> Result<(), CoreError> {
        let Some((kind, name)) = RegistryKind::for_path(relative) else {
            return Ok(());
        };
        let mut registry = self.load_registry(kind)?;
        if registry.entries.remove(&name).is_some() {
            registry.last_update = Utc::now();
            self.save_registry(kind, &registry)?;
        }
        Ok(())
    }

    // -- scanning -----------------------------------------------------------

    /// Checksum, size, and mtime of a file. No registry I/O.
    pub fn analyze_file(&self, path: &Path) -> Result<FileRecord, CoreError> {
        let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
        let (checksum, size) = checksum::sha256_file(path).map_err(|e| io_err(path, e))?;
        Ok(FileRecord {
            checksum,
            size,
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            file_path: path.to_path_buf(),
            template_version: None,
            user_modified: false,
            last_scanned: None,
            last_updated: None,
        })
    }

    /// Walk `.claude/agents/*.md` and `.claude/hooks/examples/**/*.y{a,}ml`
    /// under `project_root` and refresh both registries.
    pub fn scan_existing_files(&self, project_root: &Path) -> Result<ScanSummary, CoreError> {
        let mut summary = ScanSummary::default();
        let now = Utc::now();

        let agents_dir = join_all(project_root, AGENTS_DIR);
        let mut agents = self.load_registry(RegistryKind::Agents)?;
        for path in list_files(&agents_dir, false)? {
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let modified = self.refresh_entry(&mut agents, &name, &path, now)?;
            summary.agent_count += 1;
            summary.modified_count += usize::from(modified);
        }

        let hooks_dir = join_all(project_root, HOOKS_DIR);
        let mut hooks = self.load_registry(RegistryKind::Hooks)?;
        for path in list_files(&hooks_dir, true)? {
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("yml") | Some("yaml")) {
                continue;
            }
            let rel = path
                .strip_prefix(&hooks_dir)
                .unwrap_or(path.as_path())
                .with_extension("");
            let name = rel.to_string_lossy().replace('\\', "/");
            let modified = self.refresh_entry(&mut hooks, &name, &path, now)?;
            summary.hook_count += 1;
            summary.modified_count += usize::from(modified);
        }

        agents.last_update = now;
        hooks.last_update = now;
        self.save_registry(RegistryKind::Agents, &agents)?;
        self.save_registry(RegistryKind::Hooks, &hooks)?;
        tracing::debug!(
            agents = summary.agent_count,
            hooks = summary.hook_count,
            "scanned managed files"
        );
        Ok(summary)
    }

    /// Insert or refresh one entry; returns whether it differs from baseline.
    fn refresh_entry(
        &self,
        registry: &mut FileRegistry,
        name: &str,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let current = self.analyze_file(path)?;
        let entry = registry
            .entries
            .entry(name.to_string())
            .or_insert_with(|| current.clone());
        entry.user_modified = entry.checksum != current.checksum;
        entry.file_path = current.file_path;
        entry.last_scanned = Some(now);
        Ok(entry.user_modified)
    }

    /// Compare the file at `project_root/relative` with its registry baseline.
    pub fn detect_user_modifications(
        &self,
        project_root: &Path,
        relative: &str,
    ) -> Result<ModificationStatus, CoreError> {
        let Some((kind, name)) = RegistryKind::for_path(relative) else {
            return Ok(ModificationStatus::Untracked);
        };
        let Some(record) = self.get_record(kind, &name)? else {
            return Ok(ModificationStatus::Untracked);
        };
        let path = project_root.join(relative);
        let (current, _) = checksum::sha256_file(&path).map_err(|e| io_err(&path, e))?;
        if current == record.checksum {
            Ok(ModificationStatus::Unmodified)
        } else {
            Ok(ModificationStatus::Modified {
                recorded: record.checksum,
                current,
            })
        }
    }

    // -- version state ------------------------------------------------------

    pub fn load_system_version(&self) -> Result<SystemVersion, CoreError> {
        Ok(read_json_or_default(&self.system_version_path())?.unwrap_or_default())
    }

    pub fn save_system_version(&self, version: &SystemVersion) -> Result<(), CoreError> {
        write_json_atomic(&self.system_version_path(), version)
    }

    pub fn installed_version(&self) -> Result<Option<String>, CoreError> {
        Ok(self.load_system_version()?.installed_version)
    }

    /// Append an update attempt to the history; a successful attempt also
    /// advances the installed version.
    pub fn record_update(
        &self,
        from: Option<&str>,
        to: &str,
        success: bool,
        backup_id: Option<&BackupId>,
    ) -> Result<(), CoreError> {
        self.append_history(from, to, success, backup_id, success)
    }

    /// Log a successful update that covered only part of the managed files.
    /// The installed version stays where it was.
    pub fn record_partial_update(
        &self,
        from: Option<&str>,
        to: &str,
        backup_id: Option<&BackupId>,
    ) -> Result<(), CoreError> {
        self.append_history(from, to, true, backup_id, false)
    }

    fn append_history(
        &self,
        from: Option<&str>,
        to: &str,
        success: bool,
        backup_id: Option<&BackupId>,
        advance: bool,
    ) -> Result<(), CoreError> {
        let mut state = self.load_system_version()?;
        let now = Utc::now();
        state.update_history.push(UpdateHistoryEntry {
            timestamp: now,
            from_version: from.map(str::to_string),
            to_version: to.to_string(),
            success,
            backup_id: backup_id.cloned(),
        });
        state.last_update_check = Some(now);
        if advance {
            state.installed_version = Some(to.to_string());
        }
        self.save_system_version(&state)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn join_all(root: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |acc, p| acc.join(p))
}

fn read_json_or_default<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| CoreError::MetadataParse {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Regular files under `dir`, sorted. A missing directory yields nothing.
fn list_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, CoreError> {
    let mut out = Vec::new();
    if dir.is_dir() {
        collect_files(dir, recursive, &mut out)?;
    }
    out.sort();
    Ok(out)
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<(), CoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            if recursive {
                collect_files(&path, recursive, out)?;
            }
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
