//! Error types for upkeep-engine.

use std::path::PathBuf;

use thiserror::Error;

use upkeep_backup::BackupError;
use upkeep_core::CoreError;
use upkeep_templates::TemplateError;

use crate::merge::MarkerError;
use crate::state::UpdateState;

/// Errors that stop an update. Per-file failures during apply are not
/// errors; they are recorded in the result.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// No release could be resolved or its templates could not be cached.
    #[error("Analysis failed: {0}")]
    Analysis(#[source] TemplateError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("illegal update state transition {from} -> {to}")]
    IllegalTransition { from: UpdateState, to: UpdateState },

    #[error("template {version} does not ship {path}")]
    MissingTemplateFile { version: String, path: String },

    #[error("refusing to touch {0}: path leaves the project root")]
    EscapingPath(String),

    #[error("{path}: {source}")]
    Markers {
        path: String,
        #[source]
        source: MarkerError,
    },

    /// The consent collaborator could not produce an answer.
    #[error("consent could not be collected: {0}")]
    Consent(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`UpdateError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> UpdateError {
    UpdateError::Io {
        path: path.into(),
        source,
    }
}
