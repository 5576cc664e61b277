//! Update pipeline state machine.
//!
//! ```text
//! Analyzing -> AwaitingConsent -> BackingUp -> Applying -> Validating -> Completed
//!     |               |               |
//!     v               v               v
//!   Failed        Cancelled         Failed
//! ```
//!
//! `Analyzing -> Completed` covers the already-up-to-date case.

use std::fmt;

use serde::Serialize;

use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    Analyzing,
    AwaitingConsent,
    BackingUp,
    Applying,
    Validating,
    Completed,
    Cancelled,
    Failed,
}

impl UpdateState {
    pub fn can_transition_to(self, next: UpdateState) -> bool {
        use UpdateState::*;
        matches!(
            (self, next),
            (Analyzing, AwaitingConsent)
                | (Analyzing, Completed)
                | (Analyzing, Failed)
                | (AwaitingConsent, BackingUp)
                | (AwaitingConsent, Cancelled)
                | (BackingUp, Applying)
                | (BackingUp, Failed)
                | (Applying, Validating)
                | (Validating, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateState::Completed | UpdateState::Cancelled | UpdateState::Failed
        )
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateState::Analyzing => "analyzing",
            UpdateState::AwaitingConsent => "awaiting-consent",
            UpdateState::BackingUp => "backing-up",
            UpdateState::Applying => "applying",
            UpdateState::Validating => "validating",
            UpdateState::Completed => "completed",
            UpdateState::Cancelled => "cancelled",
            UpdateState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks the current state and every state visited.
#[derive(Debug, Clone)]
pub struct StateMachine {
    history: Vec<UpdateState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            history: vec![UpdateState::Analyzing],
        }
    }

    pub fn state(&self) -> UpdateState {
        self.history
            .last()
            .copied()
            .unwrap_or(UpdateState::Analyzing)
    }

    pub fn history(&self) -> &[UpdateState] {
        &self.history
    }

    pub fn advance(&mut self, next: UpdateState) -> Result<(), UpdateError> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(UpdateError::IllegalTransition { from, to: next });
        }
        tracing::info!("update state: {from} -> {next}");
        self.history.push(next);
        Ok(())
    }
}
