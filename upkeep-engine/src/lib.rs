//! # upkeep-engine
//!
//! Moves a workspace from its installed template release to a newer one.
//!
//! [`UpdateEngine::execute_update`] analyses the difference, asks a
//! [`ConsentProvider`] what to apply, snapshots the affected files, applies
//! the changes (smart-merging user sections) and validates the result.

pub mod analysis;
pub mod apply;
pub mod consent;
pub mod diff;
pub mod engine;
pub mod error;
pub mod merge;
pub mod state;
pub mod validation;

pub use analysis::{
    FileUpdateDecision, RiskInput, RiskNote, RiskPolicy, SizeRiskPolicy, UpdateAnalysis,
    UpdateCategories,
};
pub use apply::{AppliedAction, FileUpdateOutcome};
pub use consent::{
    ConsentAction, ConsentPolicy, ConsentProvider, FixedConsent, ForceConsent, GlobalConsent,
    Resolution,
};
pub use diff::{unified_preview, FilePreview};
pub use engine::{UpdateEngine, UpdateOptions, UpdateResult, UpdateResults};
pub use error::UpdateError;
pub use merge::{smart_merge, MarkerError, MergeOutcome};
pub use state::{StateMachine, UpdateState};
pub use validation::{validate_updates, ValidationReport};
