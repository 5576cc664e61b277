//! Filesystem layout.
//!
//! ```text
//! ~/.upkeep/
//!   config.yaml
//!   backups/backup-<ISO8601-dashed>/{manifest.json, files/...}
//!   templates/<version>/{manifest.json, files/...}
//!
//! <project>/.upkeep/
//!   metadata/{agent-registry,hook-registry,system-version}.json
//! ```
//!
//! Every helper takes an explicit root; only [`home`] consults the
//! environment.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

pub const UPKEEP_DIR: &str = ".upkeep";
pub const CONFIG_FILE: &str = "config.yaml";

pub fn upkeep_root(home: &Path) -> PathBuf {
    home.join(UPKEEP_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    upkeep_root(home).join(CONFIG_FILE)
}

pub fn backups_dir(home: &Path) -> PathBuf {
    upkeep_root(home).join("backups")
}

pub fn templates_dir(home: &Path) -> PathBuf {
    upkeep_root(home).join("templates")
}

/// Per-workspace metadata root handed to [`crate::MetadataManager::new`].
pub fn metadata_root(project: &Path) -> PathBuf {
    project.join(UPKEEP_DIR)
}

/// The user's home directory.
pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}
