//! The update pipeline.
//!
//! [`UpdateEngine::execute_update`] runs analysis, consent, backup, apply and
//! validation in order, driving a [`StateMachine`]. Nothing in the workspace
//! changes before the backup stage has succeeded.

use std::path::{Path, PathBuf};

use serde::Serialize;

use upkeep_backup::{Backup, BackupManager, BackupMetadata};
use upkeep_core::{paths, BackupId, MetadataManager, UpdateAction, UpkeepConfig};
use upkeep_templates::TemplateManager;

use crate::analysis::{Classifier, FileUpdateDecision, RiskPolicy, SizeRiskPolicy, UpdateAnalysis};
use crate::apply::{AppliedAction, Applier, FileUpdateOutcome};
use crate::consent::{ConsentPolicy, ConsentProvider, Resolution};
use crate::diff::{unified_preview, FilePreview};
use crate::error::{io_err, UpdateError};
use crate::merge;
use crate::state::{StateMachine, UpdateState};
use crate::validation::{validate_updates, ValidationReport};

// ---------------------------------------------------------------------------
// Options and result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOptions {
    /// Analyse and preview only.
    pub dry_run: bool,
    /// Accept every change without asking.
    pub force: bool,
    pub agents_only: bool,
    pub hooks_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UpdateResults {
    pub updates: Vec<FileUpdateOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub success: bool,
    pub state: UpdateState,
    pub dry_run: bool,
    pub analysis: UpdateAnalysis,
    pub results: UpdateResults,
    pub backup_id: Option<BackupId>,
    /// Files created, rewritten, merged or deleted.
    pub files_updated: usize,
    /// Files left untouched by choice (skipped or kept although unshipped).
    pub files_preserved: usize,
    pub conflicts: Vec<String>,
    pub validation: Option<ValidationReport>,
    pub previews: Vec<FilePreview>,
    pub recommendations: Vec<String>,
}

impl UpdateResult {
    fn new(state: UpdateState, dry_run: bool, analysis: UpdateAnalysis) -> Self {
        Self {
            success: true,
            state,
            dry_run,
            recommendations: analysis.recommendations.clone(),
            analysis,
            results: UpdateResults::default(),
            backup_id: None,
            files_updated: 0,
            files_preserved: 0,
            conflicts: Vec::new(),
            validation: None,
            previews: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateEngine
// ---------------------------------------------------------------------------

pub struct UpdateEngine {
    project_root: PathBuf,
    templates: TemplateManager,
    backups: BackupManager,
    metadata: MetadataManager,
    risk_policy: Box<dyn RiskPolicy>,
    batch_size: usize,
}

impl std::fmt::Debug for UpdateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("project_root", &self.project_root)
            .field("templates", &self.templates)
            .field("backups", &self.backups)
            .field("metadata", &self.metadata)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl UpdateEngine {
    pub fn new(
        project_root: impl Into<PathBuf>,
        templates: TemplateManager,
        backups: BackupManager,
        metadata: MetadataManager,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            templates,
            backups,
            metadata,
            risk_policy: Box::new(SizeRiskPolicy::default()),
            batch_size: upkeep_backup::manager::DEFAULT_BATCH_SIZE,
        }
    }

    /// Engine for `project_root` with roots and network settings from `config`.
    pub fn from_config(config: &UpkeepConfig, home: &Path, project_root: &Path) -> Self {
        let batch_size = config.effective_batch_size();
        let backups = BackupManager::new(config.backup_dir(home))
            .with_project_root(project_root)
            .with_batch_size(batch_size);
        Self::new(
            project_root,
            TemplateManager::from_config(config, home),
            backups,
            MetadataManager::new(paths::metadata_root(project_root)),
        )
        .with_batch_size(batch_size)
    }

    pub fn with_risk_policy(mut self, policy: impl RiskPolicy + 'static) -> Self {
        self.risk_policy = Box::new(policy);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Store pre-update backups under `dir` instead of the configured root.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups = BackupManager::new(dir)
            .with_project_root(&self.project_root)
            .with_batch_size(self.batch_size);
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn templates(&self) -> &TemplateManager {
        &self.templates
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    // -- pipeline -----------------------------------------------------------

    /// Run the whole pipeline.
    ///
    /// A dry run stops at `AwaitingConsent` with diff previews. `force`
    /// replaces the consent provider with the automatic policy.
    pub fn execute_update(
        &self,
        options: UpdateOptions,
        consent: &mut dyn ConsentProvider,
    ) -> Result<UpdateResult, UpdateError> {
        let mut sm = StateMachine::new();

        let mut analysis = match self.pre_update_analysis() {
            Ok(a) => a,
            Err(e) => {
                sm.advance(UpdateState::Failed)?;
                tracing::warn!("update analysis failed: {e}");
                return Err(e);
            }
        };

        if !analysis.has_updates {
            sm.advance(UpdateState::Completed)?;
            return Ok(UpdateResult::new(sm.state(), options.dry_run, analysis));
        }

        analysis
            .update_categories
            .scope(options.agents_only, options.hooks_only);
        analysis.summarize();
        sm.advance(UpdateState::AwaitingConsent)?;

        if options.dry_run {
            let previews = self.preview(&analysis);
            let mut result = UpdateResult::new(sm.state(), true, analysis);
            result.previews = previews;
            return Ok(result);
        }

        let policy = if options.force {
            ConsentPolicy::auto()
        } else {
            self.get_user_consent(&analysis, consent)?
        };
        if policy.cancelled {
            sm.advance(UpdateState::Cancelled)?;
            tracing::info!("update cancelled before any change");
            return Ok(UpdateResult::new(sm.state(), false, analysis));
        }

        sm.advance(UpdateState::BackingUp)?;
        let backup = match self.create_update_backup(&analysis, &policy) {
            Ok(b) => b,
            Err(e) => {
                sm.advance(UpdateState::Failed)?;
                return Err(e);
            }
        };
        let backup_id = backup.id().clone();

        sm.advance(UpdateState::Applying)?;
        let updates = self.execute_file_updates(&analysis, &policy);

        sm.advance(UpdateState::Validating)?;
        let validation = self.post_update_validation(&updates);

        let mut recommendations = analysis.recommendations.clone();
        let installed = !validation.has_critical();
        let scoped = options.agents_only || options.hooks_only;
        let from = analysis.current_version.as_deref();
        let recorded = if installed && scoped {
            self.metadata
                .record_partial_update(from, &analysis.latest_version, Some(&backup_id))
        } else {
            self.metadata
                .record_update(from, &analysis.latest_version, installed, Some(&backup_id))
        };
        if let Err(e) = recorded {
            tracing::warn!("could not record update history: {e}");
        }
        if installed && scoped {
            recommendations.push(format!(
                "Installed version stays at {} until an unscoped update completes",
                from.unwrap_or("none")
            ));
        }
        if !installed {
            recommendations.push(format!(
                "Critical problems found; restore the previous state with `upkeep rollback {backup_id}`"
            ));
        } else if !validation.success {
            recommendations.push(format!(
                "Some files failed to update; backup {backup_id} holds their previous content"
            ));
        }
        sm.advance(UpdateState::Completed)?;

        let files_updated = updates
            .iter()
            .filter(|o| o.wrote() || (o.success && o.action == AppliedAction::Deleted))
            .count();
        let files_preserved = updates
            .iter()
            .filter(|o| matches!(o.action, AppliedAction::Preserved | AppliedAction::Skipped))
            .count();
        let conflicts = updates
            .iter()
            .filter(|o| o.conflict)
            .map(|o| o.file_path.clone())
            .collect();
        tracing::info!(
            "update {} -> {} finished: {files_updated} updated, {files_preserved} preserved",
            analysis.current_version.as_deref().unwrap_or("none"),
            analysis.latest_version
        );

        Ok(UpdateResult {
            success: validation.success,
            state: sm.state(),
            dry_run: false,
            analysis,
            results: UpdateResults { updates },
            backup_id: Some(backup_id),
            files_updated,
            files_preserved,
            conflicts,
            validation: Some(validation),
            previews: Vec::new(),
            recommendations,
        })
    }

    // -- stages -------------------------------------------------------------

    /// Compare the workspace with the newest available release.
    ///
    /// Read-only toward the workspace; the template cache may be filled.
    pub fn pre_update_analysis(&self) -> Result<UpdateAnalysis, UpdateError> {
        let resolved = self
            .templates
            .resolve_latest_release()
            .map_err(UpdateError::Analysis)?;
        let current = self.metadata.installed_version()?;
        let latest = resolved.release.version;
        let has_updates = current.as_deref() != Some(latest.as_str());

        let mut analysis = UpdateAnalysis {
            current_version: current,
            latest_version: latest,
            release_source: resolved.origin,
            has_updates,
            update_categories: Default::default(),
            risks: Vec::new(),
            recommendations: Vec::new(),
        };
        if !has_updates {
            analysis.recommendations =
                vec![format!("Already up to date ({})", analysis.latest_version)];
            return Ok(analysis);
        }

        self.templates
            .ensure_template(&analysis.latest_version)
            .map_err(UpdateError::Analysis)?;
        let comparison = self
            .templates
            .compare_with_template(&self.project_root, &analysis.latest_version)
            .map_err(UpdateError::Analysis)?;
        analysis.update_categories = Classifier {
            project_root: &self.project_root,
            templates: &self.templates,
            metadata: &self.metadata,
            policy: self.risk_policy.as_ref(),
            version: &analysis.latest_version,
        }
        .classify(&comparison);
        analysis.summarize();
        tracing::info!(
            "analysis: {} -> {}, {} files to review",
            analysis.current_version.as_deref().unwrap_or("none"),
            analysis.latest_version,
            analysis.update_categories.len()
        );
        Ok(analysis)
    }

    pub fn get_user_consent(
        &self,
        analysis: &UpdateAnalysis,
        provider: &mut dyn ConsentProvider,
    ) -> Result<ConsentPolicy, UpdateError> {
        provider.gather(analysis)
    }

    /// Snapshot every file the policy would touch, plus the metadata
    /// documents, tagged with the old and new versions.
    pub fn create_update_backup(
        &self,
        analysis: &UpdateAnalysis,
        policy: &ConsentPolicy,
    ) -> Result<Backup, UpdateError> {
        let mut files: Vec<PathBuf> = plan(analysis, policy)
            .into_iter()
            .filter(|(_, r)| matches!(r, Resolution::Overwrite | Resolution::Merge | Resolution::Delete))
            .map(|(d, _)| self.project_root.join(&d.file_path))
            .collect();
        files.extend(self.metadata_documents()?);

        let backup = self.backups.create_backup(
            &files,
            BackupMetadata::pre_update(
                analysis.current_version.as_deref(),
                &analysis.latest_version,
            ),
        )?;
        Ok(backup)
    }

    /// Apply every consented decision. Per-file failures are recorded in
    /// the returned outcomes.
    pub fn execute_file_updates(
        &self,
        analysis: &UpdateAnalysis,
        policy: &ConsentPolicy,
    ) -> Vec<FileUpdateOutcome> {
        if let Err(e) = self.metadata.initialize_registries() {
            tracing::warn!("metadata registries unavailable: {e}");
        }
        Applier {
            project_root: &self.project_root,
            templates: &self.templates,
            metadata: &self.metadata,
            version: &analysis.latest_version,
            batch_size: self.batch_size,
        }
        .apply(&plan(analysis, policy))
    }

    pub fn post_update_validation(&self, updates: &[FileUpdateOutcome]) -> ValidationReport {
        validate_updates(&self.project_root, updates)
    }

    /// Unified diffs of what the automatic policy would write.
    pub fn preview(&self, analysis: &UpdateAnalysis) -> Vec<FilePreview> {
        analysis
            .decisions()
            .filter_map(|d| {
                let current = std::fs::read_to_string(self.project_root.join(&d.file_path))
                    .unwrap_or_default();
                let template = match d.action {
                    UpdateAction::Delete | UpdateAction::Skip => String::new(),
                    _ => self.template_text(&analysis.latest_version, &d.file_path)?,
                };
                let proposed = if d.action == UpdateAction::Update && d.merge_capable {
                    merge::smart_merge(&current, &template)
                        .map(|m| m.content)
                        .unwrap_or(template)
                } else {
                    template
                };
                let unified_diff = match d.action {
                    UpdateAction::Skip => String::new(),
                    _ => unified_preview(&d.file_path, &current, &proposed),
                };
                Some(FilePreview {
                    file_path: d.file_path.clone(),
                    action: d.action,
                    unified_diff,
                })
            })
            .collect()
    }

    // -- helpers ------------------------------------------------------------

    fn template_text(&self, version: &str, path: &str) -> Option<String> {
        let file = self.templates.template_file_path(version, path)?;
        match std::fs::read(&file) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                tracing::debug!("cannot read template {}: {e}", file.display());
                None
            }
        }
    }

    fn metadata_documents(&self) -> Result<Vec<PathBuf>, UpdateError> {
        let dir = self.metadata.metadata_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };
        let mut docs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        docs.sort();
        Ok(docs)
    }
}

fn plan(analysis: &UpdateAnalysis, policy: &ConsentPolicy) -> Vec<(FileUpdateDecision, Resolution)> {
    analysis
        .decisions()
        .map(|d| (d.clone(), policy.resolve(d)))
        .collect()
}
