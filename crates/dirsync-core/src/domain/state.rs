//! Scheduler run state
//!
//! ```text
//! Idle ──start──▶ Running ──stop / halt / error──▶ Stopped
//! ```
//!
//! `Stopped` is terminal: a scheduler instance is single-use.

use std::fmt::{self, Display, Formatter};

use super::errors::DomainError;

/// Lifecycle state of a sync scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// Constructed, never started
    #[default]
    Idle,
    /// Inside the periodic loop
    Running,
    /// Cancelled, halted or failed; never runs again
    Stopped,
}

impl SyncState {
    /// Returns the display name of the state
    pub fn name(&self) -> &'static str {
        match self {
            SyncState::Idle => "Idle",
            SyncState::Running => "Running",
            SyncState::Stopped => "Stopped",
        }
    }

    /// Checks whether a transition to `target` is allowed
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        matches!(
            (self, target),
            (SyncState::Idle, SyncState::Running) | (SyncState::Running, SyncState::Stopped)
        )
    }

    /// Performs a checked transition
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the transition is not allowed.
    pub fn transition_to(&mut self, target: SyncState) -> Result<(), DomainError> {
        if !self.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.name().to_string(),
                to: target.name().to_string(),
            });
        }
        *self = target;
        Ok(())
    }

    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Stopped)
    }
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
