//! `upkeep backups`: list, inspect, validate and prune backups.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use upkeep_backup::{BackupManager, BackupSummary};
use upkeep_core::BackupId;

/// Arguments for `upkeep backups`.
#[derive(Args, Debug)]
pub struct BackupsArgs {
    /// Backup root (default: from configuration).
    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: BackupsCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackupsCommand {
    /// List backups, newest first.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show one backup's manifest summary.
    Info { id: String },
    /// Verify every file of a backup against its manifest.
    Validate { id: String },
    /// Delete old backups, always keeping the most recent ones.
    Cleanup {
        /// Only delete backups older than this (default: from configuration).
        #[arg(long)]
        max_age_days: Option<u32>,
        /// Always keep this many recent backups (default: from configuration).
        #[arg(long)]
        keep_count: Option<usize>,
    },
    /// Delete every backup that fails validation.
    Purge,
}

impl BackupsArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = super::load_env()?;
        let project = super::project_root(None)?;
        let manager = super::backup_manager(&home, &config, self.backup_dir, &project);

        match self.command {
            BackupsCommand::List { json } => list(&manager, json),
            BackupsCommand::Info { id } => info(&manager, BackupId(id)),
            BackupsCommand::Validate { id } => validate(&manager, BackupId(id)),
            BackupsCommand::Cleanup {
                max_age_days,
                keep_count,
            } => {
                let max_age = max_age_days.unwrap_or(config.backups.max_age_days);
                let keep = keep_count.unwrap_or(config.backups.keep_count);
                let report = manager
                    .cleanup_old_backups(max_age, keep)
                    .context("backup cleanup failed")?;
                println!(
                    "{} deleted {} backups, {} remaining",
                    "✓".green(),
                    report.deleted,
                    report.remaining
                );
                for id in report.deleted_backups {
                    println!("  -  {id}");
                }
                Ok(())
            }
            BackupsCommand::Purge => {
                let purged = manager
                    .purge_corrupted_backups()
                    .context("backup purge failed")?;
                if purged.is_empty() {
                    println!("No corrupted backups found.");
                } else {
                    println!("{} purged {} corrupted backups", "✓".green(), purged.len());
                    for id in purged {
                        println!("  -  {id}");
                    }
                }
                Ok(())
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupJson {
    id: String,
    timestamp: Option<String>,
    description: Option<String>,
    file_count: usize,
    total_size: u64,
    valid: bool,
    corrupted: bool,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "description")]
    description: String,
}

fn status_label(b: &BackupSummary) -> String {
    if b.corrupted {
        "CORRUPTED".red().to_string()
    } else if b.valid {
        "valid".green().to_string()
    } else {
        "INVALID".yellow().to_string()
    }
}

fn list(manager: &BackupManager, json: bool) -> Result<()> {
    let backups = manager
        .list_available_backups()
        .context("failed to list backups")?;

    if json {
        let payload: Vec<BackupJson> = backups
            .iter()
            .map(|b| BackupJson {
                id: b.id.to_string(),
                timestamp: b.timestamp.map(|t| t.to_rfc3339()),
                description: b.metadata.as_ref().map(|m| m.description.clone()),
                file_count: b.file_count,
                total_size: b.total_size,
                valid: b.valid,
                corrupted: b.corrupted,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize backups JSON")?
        );
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups found in {}.", manager.backup_root().display());
        return Ok(());
    }
    let rows: Vec<BackupRow> = backups
        .iter()
        .map(|b| BackupRow {
            id: b.id.to_string(),
            created: b
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string()),
            files: b.file_count,
            size: super::human_size(b.total_size),
            status: status_label(b),
            description: b
                .metadata
                .as_ref()
                .map(|m| m.description.clone())
                .unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn info(manager: &BackupManager, id: BackupId) -> Result<()> {
    let Some(summary) = manager
        .get_backup_info(&id)
        .with_context(|| format!("failed to read backup {id}"))?
    else {
        bail!("backup {id} not found");
    };
    println!("{}  {}", summary.id.to_string().bold(), status_label(&summary));
    if let Some(ts) = summary.timestamp {
        println!("  created:     {}", ts.to_rfc3339());
    }
    if let Some(meta) = &summary.metadata {
        println!("  type:        {}", meta.kind);
        println!("  description: {}", meta.description);
        if let Some(v) = &meta.version {
            println!("  version:     {v}");
        }
        if let Some(v) = &meta.target_version {
            println!("  target:      {v}");
        }
    }
    println!("  files:       {}", summary.file_count);
    println!("  size:        {}", super::human_size(summary.total_size));
    println!("  path:        {}", summary.path.display());
    Ok(())
}

fn validate(manager: &BackupManager, id: BackupId) -> Result<()> {
    match manager.verify(&id) {
        Ok(manifest) => {
            println!(
                "{} backup {id} is valid ({} files)",
                "✓".green(),
                manifest.file_count
            );
            Ok(())
        }
        Err(e) => bail!("backup {id} is invalid: {e}"),
    }
}
