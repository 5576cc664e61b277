//! `upkeep rollback`: restore files from a backup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use upkeep_backup::{RestoreOptions, RestoreOutcome};
use upkeep_core::BackupId;

/// Arguments for `upkeep rollback`.
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Backup id, as shown by `upkeep backups list`.
    pub id: String,

    /// Restore under this directory instead of the original paths.
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// List what would be restored without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite existing files instead of keeping them as `.restore-backup.*`.
    #[arg(long)]
    pub force: bool,

    /// Backup root (default: from configuration).
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,
}

impl RollbackArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = super::load_env()?;
        let project = super::project_root(None)?;
        let manager = super::backup_manager(&home, &config, self.backup_dir, &project);
        let id = BackupId(self.id);

        let outcome = manager
            .restore_from_backup(
                &id,
                self.target.as_deref(),
                RestoreOptions {
                    dry_run: self.dry_run,
                    force: self.force,
                },
            )
            .with_context(|| format!("rollback from {id} failed"))?;

        match outcome {
            RestoreOutcome::Preview(previews) => {
                println!("[dry-run] {} files would be restored from {id}", previews.len());
                for p in previews {
                    let note = if p.overwrites {
                        " (exists, would be kept aside)".yellow().to_string()
                    } else {
                        String::new()
                    };
                    println!(
                        "  ~  {} ({}){note}",
                        p.destination.display(),
                        super::human_size(p.size)
                    );
                }
            }
            RestoreOutcome::Restored(report) => {
                let place = report
                    .target_root
                    .as_ref()
                    .map(|root| format!("into {}", root.display()))
                    .unwrap_or_else(|| "to their original paths".to_string());
                println!(
                    "{} restored {} files from {id} {place}",
                    "✓".green(),
                    report.restored.len()
                );
                for path in &report.restored {
                    println!("  ✎  {}", path.display());
                }
                for kept in &report.preserved {
                    println!(
                        "  {} previous {} kept as {}",
                        "·".bright_black(),
                        kept.original.display(),
                        kept.moved_to.display()
                    );
                }
            }
        }
        Ok(())
    }
}
