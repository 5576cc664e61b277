//! End-to-end update pipeline tests against an in-memory release host.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use upkeep_backup::{BackupManager, RestoreOptions};
use upkeep_core::{MetadataManager, TemplateRelease, UpdateAction};
use upkeep_engine::{
    AppliedAction, ConsentAction, ConsentPolicy, ConsentProvider, FixedConsent, UpdateAnalysis,
    UpdateEngine, UpdateError, UpdateOptions, UpdateState,
};
use upkeep_templates::{
    ReleaseOrigin, ReleaseSource, RetryPolicy, TemplateCatalog, TransportError,
};

const AGENT: &str = ".claude/agents/genie-qa.md";
const NEW_AGENT: &str = ".claude/agents/genie-new.md";
const HOOK: &str = ".claude/hooks/examples/pre-commit.yml";
const ROOT: &str = "CLAUDE.md";

const AGENT_V1: &str = "# QA v1\nintro\n<!-- USER_CUSTOM_START -->\n<!-- USER_CUSTOM_END -->\n";
const AGENT_V2: &str =
    "# QA v2\nintro v2\n<!-- USER_CUSTOM_START -->\n<!-- USER_CUSTOM_END -->\nfooter\n";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Release host serving a single version, or nothing at all.
#[derive(Clone, Default)]
struct Host {
    version: Option<&'static str>,
    files: HashMap<&'static str, &'static str>,
}

impl Host {
    fn offline() -> Self {
        Self::default()
    }

    fn v1() -> Self {
        Self {
            version: Some("v1.0.0"),
            files: HashMap::from([
                (AGENT, AGENT_V1),
                (HOOK, "name: pre-commit\nrun: lint\n"),
                (ROOT, "root v1\n"),
            ]),
        }
    }

    fn v2() -> Self {
        Self {
            version: Some("v2.0.0"),
            files: HashMap::from([
                (AGENT, AGENT_V2),
                (NEW_AGENT, "# New v2\n"),
                (HOOK, "name: pre-commit\nrun: lint --strict\n"),
                (ROOT, "root v2\n"),
            ]),
        }
    }

    fn with_file(mut self, path: &'static str, body: &'static str) -> Self {
        self.files.insert(path, body);
        self
    }
}

impl ReleaseSource for Host {
    fn latest_release(&self) -> Result<TemplateRelease, TransportError> {
        self.version
            .map(|v| TemplateRelease::from_version(v))
            .ok_or_else(|| TransportError::Connection("network unreachable".into()))
    }

    fn download_file(
        &self,
        version: &str,
        path: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError> {
        let not_found = TransportError::Status {
            code: 404,
            text: "Not Found".into(),
        };
        if self.version != Some(version) {
            return Err(not_found);
        }
        let body = self.files.get(path).ok_or(not_found)?;
        sink.write_all(body.as_bytes())
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(body.len() as u64)
    }
}

/// Consent provider for paths that must never prompt.
struct NoPrompt;

impl ConsentProvider for NoPrompt {
    fn gather(&mut self, _analysis: &UpdateAnalysis) -> Result<ConsentPolicy, UpdateError> {
        panic!("consent must not be requested");
    }
}

struct Workspace {
    home: TempDir,
    project: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("home"),
            project: TempDir::new().expect("project"),
        }
    }

    /// Workspace with v1 installed through the engine.
    fn installed_v1() -> Self {
        let ws = Self::new();
        let result = ws
            .engine(Host::v1())
            .execute_update(force(), &mut NoPrompt)
            .expect("install v1");
        assert!(result.success, "{result:?}");
        ws
    }

    fn engine(&self, host: Host) -> UpdateEngine {
        let templates = upkeep_templates::TemplateManager::new(self.home.path().join("templates"), host)
            .with_retry(RetryPolicy::none())
            .with_catalog(TemplateCatalog::new(
                [AGENT, NEW_AGENT, HOOK, ROOT].map(String::from).to_vec(),
            ));
        let backups =
            BackupManager::new(self.home.path().join("backups")).with_project_root(self.project.path());
        UpdateEngine::new(
            self.project.path(),
            templates,
            backups,
            MetadataManager::new(self.project.path().join(".upkeep")),
        )
        .with_batch_size(2)
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.project.path().join(rel)
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read project file")
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write project file");
    }

    fn installed_version(&self) -> Option<String> {
        MetadataManager::new(self.project.path().join(".upkeep"))
            .installed_version()
            .expect("system version")
    }

    fn backup_count(&self) -> usize {
        BackupManager::new(self.home.path().join("backups"))
            .list_available_backups()
            .expect("list backups")
            .len()
    }
}

fn force() -> UpdateOptions {
    UpdateOptions {
        force: true,
        ..UpdateOptions::default()
    }
}

/// Every file under `dir` with its bytes.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        for entry in fs::read_dir(&next).expect("ls") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                out.insert(path.clone(), fs::read(&path).expect("read"));
            }
        }
    }
    out
}

fn count_entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn fresh_install_creates_shipped_files() {
    let ws = Workspace::new();
    let result = ws
        .engine(Host::v1())
        .execute_update(force(), &mut NoPrompt)
        .expect("update");

    assert_eq!(result.state, UpdateState::Completed);
    assert!(result.success);
    assert_eq!(result.files_updated, 3);
    assert!(result.backup_id.is_some());
    assert_eq!(ws.read(AGENT), AGENT_V1);
    assert_eq!(ws.read(ROOT), "root v1\n");
    assert!(!ws.path(NEW_AGENT).exists(), "v1 does not ship the new agent");
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));
}

#[test]
fn up_to_date_workspace_short_circuits() {
    let ws = Workspace::installed_v1();
    let before = ws.backup_count();

    let result = ws
        .engine(Host::v1())
        .execute_update(force(), &mut NoPrompt)
        .expect("update");

    assert_eq!(result.state, UpdateState::Completed);
    assert!(!result.analysis.has_updates);
    assert!(result.backup_id.is_none());
    assert_eq!(ws.backup_count(), before);
}

#[test]
fn dry_run_previews_without_touching_the_workspace() {
    let ws = Workspace::installed_v1();
    let backups_before = ws.backup_count();
    let root_before = ws.read(ROOT);

    let result = ws
        .engine(Host::v2())
        .execute_update(
            UpdateOptions {
                dry_run: true,
                ..UpdateOptions::default()
            },
            &mut NoPrompt,
        )
        .expect("dry run");

    assert!(result.dry_run);
    assert_eq!(result.state, UpdateState::AwaitingConsent);
    assert!(result.results.updates.is_empty());
    assert_eq!(ws.read(ROOT), root_before);
    assert!(!ws.path(NEW_AGENT).exists());
    assert_eq!(ws.backup_count(), backups_before);
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));

    let root = result
        .previews
        .iter()
        .find(|p| p.file_path == ROOT)
        .expect("preview for CLAUDE.md");
    assert!(root.unified_diff.contains("-root v1"));
    assert!(root.unified_diff.contains("+root v2"));
    let created = result
        .previews
        .iter()
        .find(|p| p.file_path == NEW_AGENT)
        .expect("preview for new agent");
    assert_eq!(created.action, UpdateAction::Create);
    assert!(created.unified_diff.contains("+# New v2"));
}

#[test]
fn smart_merge_keeps_user_sections_and_backup_restores_them() {
    let ws = Workspace::installed_v1();
    let edited = "# QA v1\nintro\n<!-- USER_CUSTOM_START -->\nmy rule\n<!-- USER_CUSTOM_END -->\n";
    ws.write(AGENT, edited);

    let engine = ws.engine(Host::v2());
    let analysis = engine.pre_update_analysis().expect("analysis");
    let agent = analysis
        .decisions()
        .find(|d| d.file_path == AGENT)
        .expect("agent decision");
    assert!(agent.merge_capable);
    assert!(agent.user_modified);

    let result = engine.execute_update(force(), &mut NoPrompt).expect("update");
    assert!(result.success, "{result:?}");
    assert!(result.conflicts.is_empty());
    assert_eq!(
        ws.read(AGENT),
        "# QA v2\nintro v2\n<!-- USER_CUSTOM_START -->\nmy rule\n<!-- USER_CUSTOM_END -->\nfooter\n"
    );
    assert_eq!(ws.read(NEW_AGENT), "# New v2\n");
    assert_eq!(ws.installed_version().as_deref(), Some("v2.0.0"));
    let merged = result
        .results
        .updates
        .iter()
        .find(|o| o.file_path == AGENT)
        .expect("agent outcome");
    assert_eq!(merged.action, AppliedAction::Merged);

    let id = result.backup_id.expect("backup id");
    engine
        .backups()
        .restore_from_backup(
            &id,
            None,
            RestoreOptions {
                force: true,
                ..RestoreOptions::default()
            },
        )
        .expect("rollback");
    assert_eq!(ws.read(AGENT), edited);
    assert_eq!(ws.read(ROOT), "root v1\n");
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));
}

#[test]
fn template_without_markers_reports_a_conflict() {
    let ws = Workspace::installed_v1();
    ws.write(
        AGENT,
        "# QA v1\n<!-- USER_CUSTOM_START -->\nmy rule\n<!-- USER_CUSTOM_END -->\n",
    );

    let result = ws
        .engine(Host::v2().with_file(AGENT, "# QA v2 without sections\n"))
        .execute_update(force(), &mut NoPrompt)
        .expect("update");

    assert_eq!(result.conflicts, vec![AGENT.to_string()]);
    let content = ws.read(AGENT);
    assert!(content.starts_with("# QA v2 without sections\n"));
    assert!(content.ends_with("<!-- USER_CUSTOM_START -->\nmy rule\n<!-- USER_CUSTOM_END -->\n"));
    let validation = result.validation.expect("validation");
    assert!(validation.success);
    assert!(!validation.warnings.is_empty());
}

#[test]
fn cancelled_consent_changes_nothing() {
    let ws = Workspace::installed_v1();
    let backups_before = ws.backup_count();

    let result = ws
        .engine(Host::v2())
        .execute_update(
            UpdateOptions::default(),
            &mut FixedConsent(ConsentPolicy::cancelled()),
        )
        .expect("update");

    assert_eq!(result.state, UpdateState::Cancelled);
    assert!(result.backup_id.is_none());
    assert_eq!(ws.read(ROOT), "root v1\n");
    assert!(!ws.path(NEW_AGENT).exists());
    assert_eq!(ws.backup_count(), backups_before);
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));
}

#[test]
fn unshipped_files_survive_without_explicit_consent() {
    let ws = Workspace::installed_v1();
    let custom = ".claude/agents/my-own.md";
    ws.write(custom, "# mine\n");

    let result = ws
        .engine(Host::v2())
        .execute_update(force(), &mut NoPrompt)
        .expect("update");

    assert!(ws.path(custom).is_file());
    let outcome = result
        .results
        .updates
        .iter()
        .find(|o| o.file_path == custom)
        .expect("outcome for unshipped file");
    assert_eq!(outcome.action, AppliedAction::Preserved);
    assert!(result.files_preserved >= 1);
    assert!(result
        .analysis
        .risks
        .iter()
        .any(|r| r.files.contains(&custom.to_string())));
}

#[test]
fn explicit_consent_deletes_after_backing_up() {
    let ws = Workspace::installed_v1();
    let custom = ".claude/agents/my-own.md";
    ws.write(custom, "# mine\n");

    let engine = ws.engine(Host::v2());
    let result = engine
        .execute_update(
            UpdateOptions::default(),
            &mut FixedConsent(ConsentPolicy::auto().with_file(custom, ConsentAction::Update)),
        )
        .expect("update");

    assert!(!ws.path(custom).exists());
    let id = result.backup_id.expect("backup id");
    let manifest = engine
        .backups()
        .load_manifest(&id)
        .expect("manifest")
        .expect("present");
    assert!(manifest.files.iter().any(|f| f.relative_path == custom));
    assert!(manifest
        .files
        .iter()
        .any(|f| f.relative_path == ".upkeep/metadata/system-version.json"));
}

#[test]
fn one_failing_file_does_not_stop_the_batch() {
    let ws = Workspace::installed_v1();
    let broken = "# mine\n<!-- USER_CUSTOM_START -->\nunclosed\n";
    ws.write(AGENT, broken);

    let result = ws
        .engine(Host::v2())
        .execute_update(
            UpdateOptions::default(),
            &mut FixedConsent(ConsentPolicy::auto().with_file(AGENT, ConsentAction::SmartMerge)),
        )
        .expect("update");

    assert_eq!(result.state, UpdateState::Completed);
    assert!(!result.success);
    let failed = result
        .results
        .updates
        .iter()
        .find(|o| o.file_path == AGENT)
        .expect("agent outcome");
    assert!(!failed.success);
    assert!(failed.error.as_deref().unwrap_or_default().contains("never closed"));
    assert_eq!(ws.read(AGENT), broken);
    assert_eq!(ws.read(ROOT), "root v2\n");
    assert_eq!(ws.read(NEW_AGENT), "# New v2\n");

    let validation = result.validation.expect("validation");
    assert_eq!(validation.errors.len(), 1);
    assert!(validation.critical.is_empty());
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("failed to update")));
}

#[test]
fn no_network_and_no_cache_fails_analysis() {
    let ws = Workspace::new();
    let err = ws
        .engine(Host::offline())
        .execute_update(force(), &mut NoPrompt)
        .unwrap_err();

    assert!(matches!(err, UpdateError::Analysis(_)));
    assert!(err.to_string().starts_with("Analysis failed: "));
    assert_eq!(count_entries(ws.project.path()), 0);
}

#[test]
fn offline_update_uses_last_known_release() {
    let ws = Workspace::installed_v1();
    ws.engine(Host::v2())
        .execute_update(
            UpdateOptions {
                dry_run: true,
                ..UpdateOptions::default()
            },
            &mut NoPrompt,
        )
        .expect("dry run caches v2");

    let result = ws
        .engine(Host::offline())
        .execute_update(force(), &mut NoPrompt)
        .expect("offline update");

    assert!(result.success, "{result:?}");
    assert_eq!(result.analysis.release_source, ReleaseOrigin::LastKnownGood);
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("local cache")));
    assert_eq!(ws.read(ROOT), "root v2\n");
    assert_eq!(ws.installed_version().as_deref(), Some("v2.0.0"));
}

#[test]
fn agents_only_leaves_hooks_and_version_alone() {
    let ws = Workspace::installed_v1();
    let hook_before = ws.read(HOOK);

    let result = ws
        .engine(Host::v2())
        .execute_update(
            UpdateOptions {
                force: true,
                agents_only: true,
                ..UpdateOptions::default()
            },
            &mut NoPrompt,
        )
        .expect("update");

    assert!(result.success, "{result:?}");
    assert!(result.analysis.update_categories.hooks.is_empty());
    assert_eq!(ws.read(HOOK), hook_before);
    assert_eq!(ws.read(ROOT), "root v1\n");
    assert_eq!(ws.read(AGENT), AGENT_V2);
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));
    assert!(result
        .recommendations
        .iter()
        .any(|r| r.contains("Installed version stays at v1.0.0")));
}

#[test]
fn release_shipping_no_managed_files_is_not_installed() {
    let ws = Workspace::installed_v1();
    let before = snapshot(ws.project.path());
    let empty = Host {
        version: Some("v9.9.9"),
        files: HashMap::new(),
    };

    let err = ws
        .engine(empty)
        .execute_update(force(), &mut NoPrompt)
        .unwrap_err();

    assert!(matches!(err, UpdateError::Analysis(_)), "got: {err}");
    assert!(err.to_string().contains("ships none of the managed files"), "got: {err}");
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));
    assert_eq!(snapshot(ws.project.path()), before);
    assert_eq!(ws.backup_count(), 1);
}

#[test]
fn unwritable_backup_root_fails_before_any_change() {
    let ws = Workspace::installed_v1();
    let before = snapshot(ws.project.path());
    let blocked = ws.home.path().join("not-a-dir");
    fs::write(&blocked, "regular file").expect("write blocker");

    let err = ws
        .engine(Host::v2())
        .with_backup_dir(&blocked)
        .execute_update(force(), &mut NoPrompt)
        .unwrap_err();

    assert!(matches!(err, UpdateError::Backup(_)), "got: {err}");
    assert_eq!(snapshot(ws.project.path()), before);
    assert_eq!(ws.installed_version().as_deref(), Some("v1.0.0"));
    assert_eq!(fs::read_to_string(&blocked).expect("read"), "regular file");
    let partial = fs::read_dir(ws.home.path())
        .expect("ls home")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("backup-"))
        .count();
    assert_eq!(partial, 0);
    assert_eq!(ws.backup_count(), 1, "only the v1 install backup exists");
}
