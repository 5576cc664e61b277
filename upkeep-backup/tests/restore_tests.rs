//! Restore round-trip, conflict preservation, and dry-run tests.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;
use upkeep_backup::{
    Backup, BackupError, BackupManager, BackupMetadata, RestoreOptions, RestoreOutcome,
};
use upkeep_core::BackupId;

struct Fixture {
    _root: TempDir,
    project: TempDir,
    mgr: BackupManager,
    backup: Backup,
}

fn fixture() -> Fixture {
    let root = TempDir::new().expect("root");
    let project = TempDir::new().expect("project");
    fs::create_dir_all(project.path().join(".claude/agents")).expect("mkdir");
    fs::write(project.path().join(".claude/agents/genie-qa.md"), "# qa v1\n").expect("write");
    fs::write(project.path().join("CLAUDE.md"), "root v1\n").expect("write");

    let mgr = BackupManager::new(root.path().join("backups")).with_project_root(project.path());
    let backup = mgr
        .create_backup(
            &[
                PathBuf::from(".claude/agents/genie-qa.md"),
                PathBuf::from("CLAUDE.md"),
            ],
            BackupMetadata::pre_update(Some("v1.0.0"), "v1.1.0"),
        )
        .expect("create");
    Fixture {
        _root: root,
        project,
        mgr,
        backup,
    }
}

fn restored(outcome: RestoreOutcome) -> upkeep_backup::RestoreReport {
    match outcome {
        RestoreOutcome::Restored(report) => report,
        other => panic!("expected Restored, got {other:?}"),
    }
}

#[test]
fn round_trip_into_empty_target() {
    let fx = fixture();
    let target = TempDir::new().expect("target");

    let report = restored(
        fx.mgr
            .restore_from_backup(fx.backup.id(), Some(target.path()), RestoreOptions::default())
            .expect("restore"),
    );
    assert_eq!(report.restored.len(), 2);
    assert!(report.preserved.is_empty());
    assert_eq!(
        fs::read_to_string(target.path().join(".claude/agents/genie-qa.md")).expect("read"),
        "# qa v1\n"
    );
    assert_eq!(
        fs::read_to_string(target.path().join("CLAUDE.md")).expect("read"),
        "root v1\n"
    );
}

#[test]
fn existing_destination_is_moved_aside_not_overwritten() {
    let fx = fixture();
    let agent = fx.project.path().join(".claude/agents/genie-qa.md");
    fs::write(&agent, "# qa edited by user\n").expect("edit");

    let report = restored(
        fx.mgr
            .restore_from_backup(fx.backup.id(), None, RestoreOptions::default())
            .expect("restore"),
    );
    assert_eq!(fs::read_to_string(&agent).expect("read"), "# qa v1\n");

    let kept = report
        .preserved
        .iter()
        .find(|p| p.original == agent)
        .expect("user copy preserved");
    assert!(kept
        .moved_to
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("genie-qa.md.restore-backup.")));
    assert_eq!(
        fs::read_to_string(&kept.moved_to).expect("read preserved"),
        "# qa edited by user\n"
    );
}

#[test]
fn force_overwrites_without_preserving() {
    let fx = fixture();
    let root_doc = fx.project.path().join("CLAUDE.md");
    fs::write(&root_doc, "changed\n").expect("edit");

    let report = restored(
        fx.mgr
            .restore_from_backup(
                fx.backup.id(),
                None,
                RestoreOptions {
                    dry_run: false,
                    force: true,
                },
            )
            .expect("restore"),
    );
    assert!(report.preserved.is_empty());
    assert_eq!(fs::read_to_string(&root_doc).expect("read"), "root v1\n");
    let siblings = fs::read_dir(fx.project.path())
        .expect("ls")
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains("restore-backup"))
        .count();
    assert_eq!(siblings, 0);
}

#[test]
fn dry_run_previews_without_touching_anything() {
    let fx = fixture();
    let agent = fx.project.path().join(".claude/agents/genie-qa.md");
    fs::write(&agent, "# local edits\n").expect("edit");
    let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
    set_file_mtime(&agent, old).expect("set mtime");

    let outcome = fx
        .mgr
        .restore_from_backup(
            fx.backup.id(),
            None,
            RestoreOptions {
                dry_run: true,
                force: false,
            },
        )
        .expect("dry run");
    let previews = match outcome {
        RestoreOutcome::Preview(p) => p,
        other => panic!("expected Preview, got {other:?}"),
    };
    assert_eq!(previews.len(), 2);
    assert!(previews.iter().all(|p| p.action == "restore"));
    let agent_preview = previews
        .iter()
        .find(|p| p.destination == agent)
        .expect("agent preview");
    assert!(agent_preview.overwrites);
    assert_eq!(agent_preview.size, 8);

    assert_eq!(fs::read_to_string(&agent).expect("read"), "# local edits\n");
    let meta = fs::metadata(&agent).expect("meta");
    assert_eq!(FileTime::from_last_modification_time(&meta), old);
    let entries: Vec<_> = fs::read_dir(agent.parent().expect("parent"))
        .expect("ls")
        .filter_map(Result::ok)
        .collect();
    assert_eq!(entries.len(), 1, "dry run must not stage or preserve files");
}

#[test]
fn nonexistent_backup_is_invalid_or_corrupted() {
    let fx = fixture();
    let err = fx
        .mgr
        .restore_from_backup(
            &BackupId::from("nonexistent-id"),
            None,
            RestoreOptions::default(),
        )
        .unwrap_err();
    assert!(err.to_string().contains("invalid or corrupted"), "got: {err}");
}

#[test]
fn corrupted_backup_is_refused_before_any_write() {
    let fx = fixture();
    fs::write(fx.backup.path.join("files/CLAUDE.md"), "root v2\n").expect("tamper");
    let target = TempDir::new().expect("target");

    let err = fx
        .mgr
        .restore_from_backup(fx.backup.id(), Some(target.path()), RestoreOptions::default())
        .unwrap_err();
    assert!(matches!(err, BackupError::InvalidOrCorrupted { .. }));
    assert_eq!(fs::read_dir(target.path()).expect("ls").count(), 0);
}

#[test]
fn escaping_relative_path_is_an_integrity_error() {
    let fx = fixture();
    let manifest_path = fx.backup.path.join("manifest.json");
    let raw = fs::read_to_string(&manifest_path).expect("read");
    let tampered = raw.replace(
        "\"relativePath\": \"CLAUDE.md\"",
        "\"relativePath\": \"../../CLAUDE.md\"",
    );
    assert_ne!(raw, tampered, "fixture manifest layout changed");
    fs::write(&manifest_path, tampered).expect("write");

    let err = fx
        .mgr
        .restore_from_backup(fx.backup.id(), None, RestoreOptions::default())
        .unwrap_err();
    assert!(matches!(err, BackupError::EscapingPath { .. }), "got: {err}");
    assert!(err.is_integrity());
}

#[test]
fn file_outside_project_returns_to_its_original_path() {
    let fx = fixture();
    let outside = TempDir::new().expect("outside");
    let settings = outside.path().join("settings.json");
    fs::write(&settings, "{\"theme\":\"dark\"}\n").expect("write");
    let backup = fx
        .mgr
        .create_backup(&[settings.clone()], BackupMetadata::manual("settings"))
        .expect("create");
    fs::write(&settings, "mutated\n").expect("mutate");

    let report = restored(
        fx.mgr
            .restore_from_backup(
                backup.id(),
                None,
                RestoreOptions {
                    dry_run: false,
                    force: true,
                },
            )
            .expect("restore"),
    );
    assert_eq!(report.restored, vec![settings.clone()]);
    assert_eq!(report.target_root, None);
    assert_eq!(
        fs::read_to_string(&settings).expect("read"),
        "{\"theme\":\"dark\"}\n"
    );
    let stray = fx.project.path().join(
        settings
            .strip_prefix("/")
            .expect("absolute tempdir path"),
    );
    assert!(!stray.exists(), "no copy under the project: {}", stray.display());
}

#[test]
fn restore_ignores_the_restoring_managers_project_root() {
    let fx = fixture();
    let root_doc = fx.project.path().join("CLAUDE.md");
    fs::write(&root_doc, "mutated\n").expect("mutate");

    let elsewhere = TempDir::new().expect("elsewhere");
    let other = BackupManager::new(fx.mgr.backup_root()).with_project_root(elsewhere.path());
    restored(
        other
            .restore_from_backup(
                fx.backup.id(),
                None,
                RestoreOptions {
                    dry_run: false,
                    force: true,
                },
            )
            .expect("restore"),
    );
    assert_eq!(fs::read_to_string(&root_doc).expect("read"), "root v1\n");
    assert_eq!(fs::read_dir(elsewhere.path()).expect("ls").count(), 0);
}

#[test]
fn relative_original_path_is_refused() {
    let fx = fixture();
    let manifest_path = fx.backup.path.join("manifest.json");
    let raw = fs::read_to_string(&manifest_path).expect("read");
    let original = fx.project.path().join("CLAUDE.md");
    let needle = format!("\"originalPath\": \"{}\"", original.display());
    let tampered = raw.replace(&needle, "\"originalPath\": \"../CLAUDE.md\"");
    assert_ne!(raw, tampered, "fixture manifest layout changed");
    fs::write(&manifest_path, tampered).expect("write");

    let err = fx
        .mgr
        .restore_from_backup(fx.backup.id(), None, RestoreOptions::default())
        .unwrap_err();
    assert!(matches!(err, BackupError::EscapingPath { .. }), "got: {err}");
    assert_eq!(
        fs::read_to_string(&original).expect("read"),
        "root v1\n",
        "refused restore must not write"
    );
}
