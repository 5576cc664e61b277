pub mod backups;
pub mod rollback;
pub mod status;
pub mod templates;
pub mod update;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use upkeep_backup::BackupManager;
use upkeep_core::UpkeepConfig;

/// Home directory and the configuration loaded from it.
pub(crate) fn load_env() -> Result<(PathBuf, UpkeepConfig)> {
    let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
    let config = upkeep_core::config::load_at(&home)
        .context("failed to load ~/.upkeep/config.yaml")?;
    tracing::debug!("home: {}", home.display());
    Ok((home, config))
}

/// `--project-path`, or the current directory.
pub(crate) fn project_root(arg: Option<PathBuf>) -> Result<PathBuf> {
    match arg {
        Some(path) => {
            tracing::info!("project: {}", path.display());
            Ok(path)
        }
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

pub(crate) fn backup_manager(
    home: &Path,
    config: &UpkeepConfig,
    backup_dir: Option<PathBuf>,
    project: &Path,
) -> BackupManager {
    BackupManager::new(backup_dir.unwrap_or_else(|| config.backup_dir(home)))
        .with_project_root(project)
        .with_batch_size(config.effective_batch_size())
}

pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
