//! Metadata registry scan, modification-detection, and persistence tests.
//! Layout under test: <project>/.upkeep/metadata/{agent,hook}-registry.json

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use upkeep_core::{
    metadata::{FileRecord, REGISTRY_FORMAT_VERSION},
    paths, MetadataManager, ModificationStatus, RegistryKind,
};

fn project_with_files() -> assert_fs::TempDir {
    let project = assert_fs::TempDir::new().expect("tempdir");
    project
        .child(".claude/agents/genie-dev-coder.md")
        .write_str("# coder\n")
        .expect("agent");
    project
        .child(".claude/agents/genie-qa.md")
        .write_str("# qa\n")
        .expect("agent");
    project
        .child(".claude/agents/notes.txt")
        .write_str("ignored")
        .expect("other");
    project
        .child(".claude/hooks/examples/pre-commit.yml")
        .write_str("on: commit\n")
        .expect("hook");
    project
        .child(".claude/hooks/examples/git/pre-push.yaml")
        .write_str("on: push\n")
        .expect("nested hook");
    project
}

// ---------------------------------------------------------------------------
// 1. Initialization
// ---------------------------------------------------------------------------

#[test]
fn initialize_creates_three_documents() {
    let project = assert_fs::TempDir::new().expect("tempdir");
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    mgr.initialize_registries().expect("init");

    let dir = project.child(".upkeep/metadata");
    dir.child("agent-registry.json").assert(predicate::path::exists());
    dir.child("hook-registry.json").assert(predicate::path::exists());
    dir.child("system-version.json").assert(predicate::path::exists());

    let agents = mgr.load_registry(RegistryKind::Agents).expect("load");
    assert_eq!(agents.version, REGISTRY_FORMAT_VERSION);
    assert!(agents.entries.is_empty());
    assert!(mgr.installed_version().expect("version").is_none());
}

// ---------------------------------------------------------------------------
// 2. Scanning
// ---------------------------------------------------------------------------

#[test]
fn scan_registers_agents_and_nested_hooks() {
    let project = project_with_files();
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));

    let summary = mgr.scan_existing_files(project.path()).expect("scan");
    assert_eq!(summary.agent_count, 2);
    assert_eq!(summary.hook_count, 2);
    assert_eq!(summary.modified_count, 0);

    let hooks = mgr.load_registry(RegistryKind::Hooks).expect("hooks");
    assert!(hooks.entries.contains_key("pre-commit"));
    assert!(hooks.entries.contains_key("git/pre-push"));

    let coder = mgr
        .get_agent_metadata("genie-dev-coder")
        .expect("load")
        .expect("registered");
    assert_eq!(coder.size, 8);
    assert!(coder.last_scanned.is_some());
}

#[test]
fn rescan_flags_edits_without_moving_baseline() {
    let project = project_with_files();
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    mgr.scan_existing_files(project.path()).expect("first scan");
    let baseline = mgr
        .get_agent_metadata("genie-qa")
        .expect("load")
        .expect("registered")
        .checksum;

    project
        .child(".claude/agents/genie-qa.md")
        .write_str("# qa\nmy notes\n")
        .expect("edit");
    let summary = mgr.scan_existing_files(project.path()).expect("second scan");
    assert_eq!(summary.modified_count, 1);

    let record = mgr
        .get_agent_metadata("genie-qa")
        .expect("load")
        .expect("registered");
    assert!(record.user_modified);
    assert_eq!(record.checksum, baseline);
}

#[test]
fn scan_of_empty_project_is_fine() {
    let project = assert_fs::TempDir::new().expect("tempdir");
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    let summary = mgr.scan_existing_files(project.path()).expect("scan");
    assert_eq!(summary.agent_count + summary.hook_count, 0);
}

// ---------------------------------------------------------------------------
// 3. Modification detection
// ---------------------------------------------------------------------------

#[test]
fn detect_modifications_against_installed_baseline() {
    let project = project_with_files();
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    let rel = ".claude/agents/genie-dev-coder.md";

    assert_eq!(
        mgr.detect_user_modifications(project.path(), rel).expect("detect"),
        ModificationStatus::Untracked
    );

    mgr.record_installed_file(project.path(), rel, "v1.0.0")
        .expect("record");
    assert_eq!(
        mgr.detect_user_modifications(project.path(), rel).expect("detect"),
        ModificationStatus::Unmodified
    );
    let record = mgr
        .get_agent_metadata("genie-dev-coder")
        .expect("load")
        .expect("registered");
    assert_eq!(record.template_version.as_deref(), Some("v1.0.0"));

    project.child(rel).write_str("# coder\ncustom\n").expect("edit");
    let status = mgr.detect_user_modifications(project.path(), rel).expect("detect");
    assert!(status.is_modified(), "got: {status:?}");
}

#[test]
fn forget_file_removes_entry() {
    let project = project_with_files();
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    let rel = ".claude/hooks/examples/pre-commit.yml";
    mgr.record_installed_file(project.path(), rel, "v1.0.0")
        .expect("record");
    mgr.forget_file(rel).expect("forget");
    assert!(mgr
        .get_record(RegistryKind::Hooks, "pre-commit")
        .expect("load")
        .is_none());
}

// ---------------------------------------------------------------------------
// 4. Persistence
// ---------------------------------------------------------------------------

#[test]
fn registry_round_trips_camel_case_json() {
    let project = project_with_files();
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    let path = project.path().join(".claude/agents/genie-qa.md");
    let record: FileRecord = mgr.analyze_file(&path).expect("analyze");
    mgr.update_agent_registry("genie-qa", record).expect("update");

    let raw = std::fs::read_to_string(
        project.path().join(".upkeep/metadata/agent-registry.json"),
    )
    .expect("read");
    assert!(raw.contains("\"lastUpdate\""));
    assert!(raw.contains("\"filePath\""));
    assert!(!project
        .path()
        .join(".upkeep/metadata/agent-registry.json.upkeep.tmp")
        .exists());
}

#[test]
fn record_update_keeps_history_in_order() {
    let project = assert_fs::TempDir::new().expect("tempdir");
    let mgr = MetadataManager::new(paths::metadata_root(project.path()));
    mgr.record_update(None, "v1.0.0", true, None).expect("first");
    mgr.record_update(Some("v1.0.0"), "v1.1.0", true, None)
        .expect("second");

    let state = mgr.load_system_version().expect("load");
    assert_eq!(state.installed_version.as_deref(), Some("v1.1.0"));
    let tos: Vec<_> = state.update_history.iter().map(|h| h.to_version.as_str()).collect();
    assert_eq!(tos, ["v1.0.0", "v1.1.0"]);
    assert_eq!(state.update_history[1].from_version.as_deref(), Some("v1.0.0"));
}
