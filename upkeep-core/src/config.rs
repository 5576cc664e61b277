//! `~/.upkeep/config.yaml`: optional user configuration.
//!
//! Every field has a default, so a missing file or a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::paths;

pub const DEFAULT_API_URL: &str = "https://api.github.com/repos/namastexlabs/automagik-genie";
pub const DEFAULT_RAW_URL: &str = "https://raw.githubusercontent.com/namastexlabs/automagik-genie";

/// Root of the YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpkeepConfig {
    pub release: ReleaseConfig,
    pub backups: BackupConfig,
    pub templates: TemplateConfig,
    /// Files handled per batch during backup and apply.
    pub batch_size: usize,
}

/// Upstream release endpoint and transport budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Repository API root; `/releases/latest` is appended.
    pub api_url: String,
    /// Raw file host root; `/<version>/<path>` is appended.
    pub raw_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: Option<PathBuf>,
    pub max_age_days: u32,
    pub keep_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TemplateConfig {
    pub cache_dir: Option<PathBuf>,
    /// Overrides the built-in managed file list when non-empty.
    pub files: Vec<String>,
}

impl Default for UpkeepConfig {
    fn default() -> Self {
        Self {
            release: ReleaseConfig::default(),
            backups: BackupConfig::default(),
            templates: TemplateConfig::default(),
            batch_size: 50,
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            raw_url: DEFAULT_RAW_URL.to_string(),
            user_agent: format!("upkeep/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_age_days: 30,
            keep_count: 5,
        }
    }
}

impl UpkeepConfig {
    pub fn backup_dir(&self, home: &Path) -> PathBuf {
        self.backups
            .dir
            .clone()
            .unwrap_or_else(|| paths::backups_dir(home))
    }

    pub fn cache_dir(&self, home: &Path) -> PathBuf {
        self.templates
            .cache_dir
            .clone()
            .unwrap_or_else(|| paths::templates_dir(home))
    }

    /// Batch size clamped to at least one file.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

impl ReleaseConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Load `<home>/.upkeep/config.yaml`, falling back to defaults when absent.
///
/// Returns `CoreError::ConfigParse` (with path + line context) if malformed.
pub fn load_at(home: &Path) -> Result<UpkeepConfig, CoreError> {
    let path = paths::config_path(home);
    if !path.exists() {
        return Ok(UpkeepConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(UpkeepConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| CoreError::ConfigParse { path, source: e })
}

/// `load_at` convenience wrapper using the real home directory.
pub fn load() -> Result<UpkeepConfig, CoreError> {
    load_at(&paths::home()?)
}
