//! `upkeep templates`: the local template cache.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use upkeep_templates::TemplateManager;

/// Arguments for `upkeep templates`.
#[derive(Args, Debug)]
pub struct TemplatesArgs {
    #[command(subcommand)]
    pub command: TemplatesCommand,
}

#[derive(Subcommand, Debug)]
pub enum TemplatesCommand {
    /// List cached template versions with their integrity status.
    List,
    /// Remove one cached version, or the whole cache.
    Clear { version: Option<String> },
}

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "downloaded")]
    downloaded: String,
    #[tabled(rename = "files")]
    files: usize,
    #[tabled(rename = "status")]
    status: String,
}

impl TemplatesArgs {
    pub fn run(self) -> Result<()> {
        let (home, config) = super::load_env()?;
        let manager = TemplateManager::from_config(&config, &home);

        match self.command {
            TemplatesCommand::List => {
                let versions = manager
                    .list_cached_versions()
                    .context("failed to read template cache")?;
                if let Some(latest) = manager.last_known_release() {
                    println!("Last known release: {}", latest.version.bold());
                }
                if versions.is_empty() {
                    println!("No cached templates in {}.", manager.cache_dir().display());
                    return Ok(());
                }
                let rows: Vec<TemplateRow> = versions
                    .into_iter()
                    .map(|v| TemplateRow {
                        status: if v.corrupted {
                            "CORRUPTED".red().to_string()
                        } else if v.valid {
                            "valid".green().to_string()
                        } else {
                            "INVALID".yellow().to_string()
                        },
                        version: v.version,
                        downloaded: v
                            .downloaded_at
                            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        files: v.file_count,
                    })
                    .collect();
                let mut table = Table::new(rows);
                table.with(Style::rounded());
                println!("{table}");
            }
            TemplatesCommand::Clear { version } => {
                manager
                    .clear_cache(version.as_deref())
                    .context("failed to clear template cache")?;
                match version {
                    Some(v) => println!("{} cleared cached template {v}", "✓".green()),
                    None => println!("{} cleared template cache", "✓".green()),
                }
            }
        }
        Ok(())
    }
}
