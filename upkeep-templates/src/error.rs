//! Error types for upkeep-templates.

use std::path::PathBuf;

use thiserror::Error;

use upkeep_core::CoreError;

/// A single failed exchange with the release host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {code}: {text}")]
    Status { code: u16, text: String },

    #[error("Request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    /// The body ended before `Content-Length` bytes arrived.
    #[error("response truncated after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Status { code: 404, .. })
    }

    /// Client errors other than 408/429 will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { code, .. } => {
                !(400..500).contains(code) || *code == 408 || *code == 429
            }
            _ => true,
        }
    }
}

/// All errors that can arise from release lookup and the template cache.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to fetch latest release: {0}")]
    Fetch(#[source] TransportError),

    #[error("Template download failed: {0}")]
    Download(#[source] Box<TemplateError>),

    #[error("{path}: {source}")]
    File {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("no template release available: {0}")]
    NoRelease(#[source] Box<TemplateError>),

    #[error("release {0} ships none of the managed files")]
    EmptyRelease(String),

    #[error("template version {0} is not cached")]
    NotCached(String),

    #[error("invalid template version {0:?}")]
    InvalidVersion(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse template manifest at {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("template JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience constructor for [`TemplateError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TemplateError {
    TemplateError::Io {
        path: path.into(),
        source,
    }
}
