//! Template release lookup and the local template cache.
//!
//! ```text
//! <cacheRoot>/
//!   latest-release.json          last release fetched successfully
//!   <version>/manifest.json
//!   <version>/files/<path>
//! ```
//!
//! Downloads are assembled in a `.staging-*` sibling and renamed into
//! `<version>/` only once every file and the manifest are on disk.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use upkeep_core::checksum::sha256_file;
use upkeep_core::fsutil::{join_relative, write_json_atomic};
use upkeep_core::{TemplateRelease, UpkeepConfig};

use crate::catalog::{is_template_managed, TemplateCatalog, TemplateFile, SKIP_DIRS};
use crate::error::{io_err, TemplateError, TransportError};
use crate::retry::RetryPolicy;
use crate::source::{HttpReleaseSource, ReleaseSource};

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";
const LAST_RELEASE_FILE: &str = "latest-release.json";

// ---------------------------------------------------------------------------
// Cache documents
// ---------------------------------------------------------------------------

/// One downloaded file in a cached version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    #[serde(flatten)]
    pub file: TemplateFile,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    pub version: String,
    pub downloaded_at: DateTime<Utc>,
    pub files: Vec<CachedFile>,
}

/// One row of [`TemplateManager::list_cached_versions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTemplateVersion {
    pub version: String,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub file_count: usize,
    pub valid: bool,
    pub corrupted: bool,
}

/// Where a resolved release came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseOrigin {
    Remote,
    LastKnownGood,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub release: TemplateRelease,
    pub origin: ReleaseOrigin,
}

/// Project files versus one cached version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TemplateComparison {
    pub version: String,
    pub identical: Vec<TemplateFile>,
    pub different: Vec<TemplateFile>,
    pub missing: Vec<TemplateFile>,
    /// Template-managed project files the release does not ship.
    pub extra: Vec<TemplateFile>,
}

impl TemplateComparison {
    pub fn total_files(&self) -> usize {
        self.identical.len() + self.different.len() + self.missing.len()
    }
}

// ---------------------------------------------------------------------------
// TemplateManager
// ---------------------------------------------------------------------------

pub struct TemplateManager {
    cache_dir: PathBuf,
    source: Box<dyn ReleaseSource>,
    retry: RetryPolicy,
    catalog: TemplateCatalog,
}

impl std::fmt::Debug for TemplateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateManager")
            .field("cache_dir", &self.cache_dir)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TemplateManager {
    pub fn new(cache_dir: impl Into<PathBuf>, source: impl ReleaseSource + 'static) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source: Box::new(source),
            retry: RetryPolicy::default(),
            catalog: TemplateCatalog::default(),
        }
    }

    /// HTTP-backed manager wired from configuration.
    pub fn from_config(config: &UpkeepConfig, home: &Path) -> Self {
        Self::new(config.cache_dir(home), HttpReleaseSource::new(&config.release))
            .with_retry(RetryPolicy::from_config(&config.release))
            .with_catalog(TemplateCatalog::from_config(&config.templates))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    fn version_dir(&self, version: &str) -> Result<PathBuf, TemplateError> {
        let dir = join_relative(&self.cache_dir, version)
            .filter(|d| d.parent() == Some(self.cache_dir.as_path()))
            .filter(|_| !version.starts_with('.'))
            .ok_or_else(|| TemplateError::InvalidVersion(version.to_string()))?;
        Ok(dir)
    }

    // -- releases -----------------------------------------------------------

    /// Ask the release host for its latest release, with retry.
    ///
    /// A success is recorded as the last-known-good release.
    pub fn fetch_latest_release(&self) -> Result<TemplateRelease, TemplateError> {
        let release = self
            .retry
            .run("fetch latest release", |_| self.source.latest_release())
            .map_err(TemplateError::Fetch)?;
        tracing::info!("latest release is {}", release.version);
        if let Err(e) = self.remember_release(&release) {
            tracing::warn!("could not record last-known-good release: {e}");
        }
        Ok(release)
    }

    fn remember_release(&self, release: &TemplateRelease) -> Result<(), TemplateError> {
        write_json_atomic(&self.cache_dir.join(LAST_RELEASE_FILE), release)?;
        Ok(())
    }

    /// The release recorded by the last successful fetch.
    pub fn last_known_release(&self) -> Option<TemplateRelease> {
        let path = self.cache_dir.join(LAST_RELEASE_FILE);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(release) => Some(release),
            Err(e) => {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                None
            }
        }
    }

    /// Remote release, else the last-known-good record, else the newest
    /// valid cached version.
    pub fn resolve_latest_release(&self) -> Result<ResolvedRelease, TemplateError> {
        let fetch_err = match self.fetch_latest_release() {
            Ok(release) => {
                return Ok(ResolvedRelease {
                    release,
                    origin: ReleaseOrigin::Remote,
                })
            }
            Err(e) => e,
        };
        tracing::warn!("{fetch_err}; falling back to cached release data");

        if let Some(release) = self.last_known_release() {
            return Ok(ResolvedRelease {
                release,
                origin: ReleaseOrigin::LastKnownGood,
            });
        }
        let newest = self
            .list_cached_versions()?
            .into_iter()
            .find(|v| v.valid);
        match newest {
            Some(cached) => Ok(ResolvedRelease {
                release: TemplateRelease::from_version(cached.version),
                origin: ReleaseOrigin::Cache,
            }),
            None => Err(TemplateError::NoRelease(Box::new(fetch_err))),
        }
    }

    // -- download -----------------------------------------------------------

    /// Download every catalog file of `version` into the cache.
    ///
    /// An existing cache entry is returned as-is unless `force`. Files the
    /// release does not contain (HTTP 404) are left out of the manifest; a
    /// release containing none of them is refused.
    pub fn download_template(&self, version: &str, force: bool) -> Result<PathBuf, TemplateError> {
        let final_dir = self.version_dir(version)?;
        if !force && final_dir.join(MANIFEST_FILE).is_file() {
            return Ok(final_dir);
        }
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| TemplateError::Download(Box::new(io_err(&self.cache_dir, e))))?;

        let staging = self.cache_dir.join(format!(
            ".staging-{version}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_millis()
        ));
        let result = self
            .download_into(version, &staging)
            .and_then(|()| self.promote(&staging, &final_dir));
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(&staging);
            tracing::warn!("download of {version} abandoned: {e}");
            return Err(TemplateError::Download(Box::new(e)));
        }
        tracing::info!("cached template {version} at {}", final_dir.display());
        Ok(final_dir)
    }

    fn download_into(&self, version: &str, staging: &Path) -> Result<(), TemplateError> {
        let files_dir = staging.join(FILES_DIR);
        std::fs::create_dir_all(&files_dir).map_err(|e| io_err(&files_dir, e))?;

        let mut files = Vec::new();
        for entry in self.catalog.entries() {
            let dest = join_relative(&files_dir, &entry.path)
                .ok_or_else(|| TemplateError::InvalidVersion(entry.path.clone()))?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }

            let fetched = self.retry.run(&entry.path, |_| {
                let file = File::create(&dest).map_err(|e| TransportError::Connection(e.to_string()))?;
                let mut writer = BufWriter::new(file);
                let n = self.source.download_file(version, &entry.path, &mut writer)?;
                writer
                    .flush()
                    .map_err(|e| TransportError::Connection(e.to_string()))?;
                Ok(n)
            });
            match fetched {
                Ok(_) => {
                    let (checksum, size) = sha256_file(&dest).map_err(|e| io_err(&dest, e))?;
                    tracing::debug!("downloaded {} ({size} bytes)", entry.path);
                    files.push(CachedFile {
                        file: entry,
                        size,
                        checksum,
                    });
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!("{version} does not ship {}, skipping", entry.path);
                    let _ = std::fs::remove_file(&dest);
                }
                Err(source) => {
                    return Err(TemplateError::File {
                        path: entry.path,
                        source,
                    })
                }
            }
        }

        if files.is_empty() {
            return Err(TemplateError::EmptyRelease(version.to_string()));
        }
        let manifest = TemplateManifest {
            version: version.to_string(),
            downloaded_at: Utc::now(),
            files,
        };
        write_json_atomic(&staging.join(MANIFEST_FILE), &manifest)?;
        Ok(())
    }

    fn promote(&self, staging: &Path, final_dir: &Path) -> Result<(), TemplateError> {
        if final_dir.exists() {
            std::fs::remove_dir_all(final_dir).map_err(|e| io_err(final_dir, e))?;
        }
        std::fs::rename(staging, final_dir).map_err(|e| io_err(final_dir, e))
    }

    // -- cache --------------------------------------------------------------

    /// Local lookup only: the cached directory for `version`, if present.
    pub fn get_cached_template(&self, version: &str) -> Option<PathBuf> {
        let dir = self.version_dir(version).ok()?;
        dir.join(MANIFEST_FILE).is_file().then_some(dir)
    }

    pub fn load_manifest(&self, version: &str) -> Result<TemplateManifest, TemplateError> {
        let dir = self
            .get_cached_template(version)
            .ok_or_else(|| TemplateError::NotCached(version.to_string()))?;
        let path = dir.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|source| TemplateError::ManifestParse { path, source })
    }

    /// Cached copy of one template file, if the version ships it.
    pub fn template_file_path(&self, version: &str, path: &str) -> Option<PathBuf> {
        let dir = self.get_cached_template(version)?;
        let file = join_relative(&dir.join(FILES_DIR), path)?;
        file.is_file().then_some(file)
    }

    /// The manifest lists at least one file and every entry exists with the
    /// recorded size and checksum.
    pub fn validate_template_integrity(&self, version: &str) -> bool {
        let manifest = match self.load_manifest(version) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("template {version} invalid: {e}");
                return false;
            }
        };
        if manifest.files.is_empty() {
            tracing::debug!("template {version} invalid: no files");
            return false;
        }
        manifest.files.iter().all(|cached| {
            let Some(path) = self.template_file_path(version, &cached.file.path) else {
                tracing::debug!("template {version}: {} missing", cached.file.path);
                return false;
            };
            match sha256_file(&path) {
                Ok((checksum, size)) => size == cached.size && checksum == cached.checksum,
                Err(_) => false,
            }
        })
    }

    /// A valid cached copy of `version`, re-downloading a corrupted one.
    pub fn ensure_template(&self, version: &str) -> Result<PathBuf, TemplateError> {
        if let Some(dir) = self.get_cached_template(version) {
            if self.validate_template_integrity(version) {
                return Ok(dir);
            }
            tracing::warn!("cached template {version} is corrupted, purging");
            self.clear_cache(Some(version))?;
        }
        self.download_template(version, true)
    }

    /// Cached versions, newest download first.
    pub fn list_cached_versions(&self) -> Result<Vec<CachedTemplateVersion>, TemplateError> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.cache_dir, e)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.cache_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || name.starts_with('.') || !entry.path().join(MANIFEST_FILE).is_file() {
                continue;
            }
            out.push(match self.load_manifest(&name) {
                Ok(manifest) => CachedTemplateVersion {
                    downloaded_at: Some(manifest.downloaded_at),
                    file_count: manifest.files.len(),
                    valid: self.validate_template_integrity(&name),
                    corrupted: false,
                    version: name,
                },
                Err(_) => CachedTemplateVersion {
                    version: name,
                    downloaded_at: None,
                    file_count: 0,
                    valid: false,
                    corrupted: true,
                },
            });
        }
        out.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));
        Ok(out)
    }

    /// Remove one cached version, or the whole cache when `version` is `None`.
    pub fn clear_cache(&self, version: Option<&str>) -> Result<(), TemplateError> {
        let target = match version {
            Some(v) => self.version_dir(v)?,
            None => self.cache_dir.clone(),
        };
        match std::fs::remove_dir_all(&target) {
            Ok(()) => {
                tracing::info!("cleared {}", target.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&target, e)),
        }
    }

    // -- comparison ---------------------------------------------------------

    /// Classify each cached template file against `project_root`.
    pub fn compare_with_template(
        &self,
        project_root: &Path,
        version: &str,
    ) -> Result<TemplateComparison, TemplateError> {
        let manifest = self.load_manifest(version)?;
        let mut comparison = TemplateComparison {
            version: version.to_string(),
            ..TemplateComparison::default()
        };

        for cached in &manifest.files {
            let Some(project_file) = join_relative(project_root, &cached.file.path) else {
                continue;
            };
            if !project_file.is_file() {
                comparison.missing.push(cached.file.clone());
                continue;
            }
            let (checksum, _) =
                sha256_file(&project_file).map_err(|e| io_err(&project_file, e))?;
            if checksum == cached.checksum {
                comparison.identical.push(cached.file.clone());
            } else {
                comparison.different.push(cached.file.clone());
            }
        }

        let shipped: Vec<&str> = manifest.files.iter().map(|f| f.file.path.as_str()).collect();
        let mut extra = Vec::new();
        find_managed_files(project_root, "", &mut extra);
        extra.sort();
        comparison.extra = extra
            .into_iter()
            .filter(|rel| !shipped.contains(&rel.as_str()))
            .map(TemplateFile::new)
            .collect();
        Ok(comparison)
    }
}

/// Collect template-managed files under `dir`. Unreadable directories are
/// skipped.
fn find_managed_files(dir: &Path, prefix: &str, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if !SKIP_DIRS.contains(&name.as_str()) {
                find_managed_files(&entry.path(), &rel, out);
            }
        } else if file_type.is_file() && is_template_managed(&rel) {
            out.push(rel);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
