//! # upkeep-templates
//!
//! Upstream template releases and the offline-capable local cache.
//!
//! [`TemplateManager`] is the entry point. Network access goes through a
//! [`ReleaseSource`]; [`HttpReleaseSource`] is the production one.

pub mod catalog;
pub mod error;
pub mod manager;
pub mod retry;
pub mod source;

pub use catalog::{is_template_managed, TemplateCatalog, TemplateFile, DEFAULT_TEMPLATE_FILES};
pub use error::{TemplateError, TransportError};
pub use manager::{
    CachedFile, CachedTemplateVersion, ReleaseOrigin, ResolvedRelease, TemplateComparison,
    TemplateManager, TemplateManifest,
};
pub use retry::RetryPolicy;
pub use source::{parse_release, HttpReleaseSource, ReleaseSource};
