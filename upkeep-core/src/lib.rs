//! upkeep core library: shared domain types, checksums, configuration,
//! path layout, and the installed-file metadata registry.
//!
//! - [`types`]: newtypes and domain enums shared across crates
//! - [`error`]: [`CoreError`]
//! - [`checksum`]: streaming SHA-256 helpers
//! - [`fsutil`]: atomic `.tmp` + rename writes
//! - [`paths`]: `~/.upkeep/` layout
//! - [`config`]: `~/.upkeep/config.yaml`
//! - [`metadata`]: [`MetadataManager`]

pub mod checksum;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod metadata;
pub mod paths;
pub mod types;

pub use config::UpkeepConfig;
pub use error::CoreError;
pub use metadata::{MetadataManager, ModificationStatus, RegistryKind};
pub use types::{
    BackupId, FileCategory, FileKind, RiskLevel, TemplateRelease, UpdateAction,
};
