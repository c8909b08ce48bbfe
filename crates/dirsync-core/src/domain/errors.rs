//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including path validation failures and invalid state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Two of the configured paths contain one another
    #[error("Paths must not be inside each other: {inner} is inside {outer}")]
    PathsOverlap {
        /// The nested path
        inner: String,
        /// The containing directory
        outer: String,
    },

    /// The synchronization interval is not a positive number of seconds
    #[error("Interval must be a positive integer, got {0}")]
    InvalidInterval(u64),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
