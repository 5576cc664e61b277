//! `upkeep status`: installed version, tracked files, backups and cache.
//!
//! Read-only: registries are loaded, never rescanned. `--check-remote` also
//! runs the update analysis, which may refresh the template cache but never
//! touches the workspace.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use upkeep_core::checksum::sha256_file;
use upkeep_core::metadata::{FileRegistry, UpdateHistoryEntry};
use upkeep_core::{paths, MetadataManager, RegistryKind, RiskLevel};
use upkeep_engine::UpdateEngine;
use upkeep_templates::{ReleaseOrigin, TemplateManager};

/// Arguments for `upkeep status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workspace to inspect (default: current directory).
    #[arg(long)]
    pub project_path: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Also resolve the latest release and count pending changes.
    #[arg(long)]
    pub check_remote: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    project: PathBuf,
    installed_version: Option<String>,
    last_known_release: Option<String>,
    last_update_check: Option<String>,
    agents: RegistryStatus,
    hooks: RegistryStatus,
    backups: usize,
    latest_backup: Option<String>,
    cached_templates: Vec<String>,
    recent_updates: Vec<UpdateHistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<RemoteStatus>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteStatus {
    latest_version: String,
    release_source: ReleaseOrigin,
    has_updates: bool,
    pending_changes: usize,
    highest_risk: RiskLevel,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct RegistryStatus {
    tracked: usize,
    modified: usize,
    missing: usize,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "from")]
    from: String,
    #[tabled(rename = "to")]
    to: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "backup")]
    backup: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = super::load_env()?;
        let project = super::project_root(self.project_path)?;
        let metadata = MetadataManager::new(paths::metadata_root(&project));
        let templates = TemplateManager::from_config(&config, &home);
        let backups = super::backup_manager(&home, &config, None, &project);

        let system = metadata
            .load_system_version()
            .context("failed to read system-version.json")?;
        let all_backups = backups
            .list_available_backups()
            .context("failed to list backups")?;
        let cached = templates
            .list_cached_versions()
            .context("failed to read template cache")?;

        let remote = if self.check_remote {
            let analysis = UpdateEngine::from_config(&config, &home, &project)
                .pre_update_analysis()
                .context("remote check failed")?;
            Some(RemoteStatus {
                pending_changes: analysis.update_categories.len(),
                highest_risk: analysis.highest_risk(),
                latest_version: analysis.latest_version,
                release_source: analysis.release_source,
                has_updates: analysis.has_updates,
            })
        } else {
            None
        };

        let report = StatusReport {
            installed_version: system.installed_version.clone(),
            last_known_release: templates.last_known_release().map(|r| r.version),
            last_update_check: system.last_update_check.map(|t| t.to_rfc3339()),
            agents: registry_status(
                &metadata
                    .load_registry(RegistryKind::Agents)
                    .context("failed to read agent registry")?,
            ),
            hooks: registry_status(
                &metadata
                    .load_registry(RegistryKind::Hooks)
                    .context("failed to read hook registry")?,
            ),
            backups: all_backups.len(),
            latest_backup: all_backups.first().map(|b| b.id.to_string()),
            cached_templates: cached.into_iter().map(|c| c.version).collect(),
            recent_updates: system.update_history.iter().rev().take(5).cloned().collect(),
            remote,
            project,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

fn registry_status(registry: &FileRegistry) -> RegistryStatus {
    let mut status = RegistryStatus {
        tracked: registry.entries.len(),
        ..RegistryStatus::default()
    };
    for record in registry.entries.values() {
        match sha256_file(&record.file_path) {
            Ok((checksum, _)) if checksum != record.checksum => status.modified += 1,
            Ok(_) => {}
            Err(_) => status.missing += 1,
        }
    }
    status
}

fn print_report(report: &StatusReport) {
    println!(
        "upkeep v{} | {}",
        env!("CARGO_PKG_VERSION"),
        report.project.display()
    );
    let installed = report
        .installed_version
        .as_deref()
        .map(|v| v.green().to_string())
        .unwrap_or_else(|| "not installed".yellow().to_string());
    println!("  installed:    {installed}");
    if let Some(latest) = &report.last_known_release {
        let note = match &report.installed_version {
            Some(v) if v == latest => String::new(),
            _ => format!(" {}", "(update available)".yellow()),
        };
        println!("  latest known: {latest}{note}");
    }
    for (label, reg) in [("agents", &report.agents), ("hooks", &report.hooks)] {
        println!(
            "  {label:<13} {} tracked, {} modified, {} missing",
            reg.tracked, reg.modified, reg.missing
        );
    }
    println!(
        "  backups:      {}{}",
        report.backups,
        report
            .latest_backup
            .as_deref()
            .map(|id| format!(" (latest {id})"))
            .unwrap_or_default()
    );
    if !report.cached_templates.is_empty() {
        println!("  cached:       {}", report.cached_templates.join(", "));
    }
    if let Some(remote) = &report.remote {
        let source = match remote.release_source {
            ReleaseOrigin::Remote => String::new(),
            _ => format!(" {}", "(from local cache)".yellow()),
        };
        if remote.has_updates {
            println!(
                "  remote:       {}{source}: {} files to change, highest risk {}",
                remote.latest_version.green(),
                remote.pending_changes,
                remote.highest_risk
            );
        } else {
            println!("  remote:       {} is installed{source}", remote.latest_version);
        }
    }

    if report.recent_updates.is_empty() {
        return;
    }
    let rows: Vec<HistoryRow> = report
        .recent_updates
        .iter()
        .map(|h| HistoryRow {
            when: h.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            from: h.from_version.clone().unwrap_or_else(|| "-".to_string()),
            to: h.to_version.clone(),
            result: if h.success {
                "ok".green().to_string()
            } else {
                "failed".red().to_string()
            },
            backup: h
                .backup_id
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
