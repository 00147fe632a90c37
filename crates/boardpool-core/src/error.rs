//! Error types shared across the workspace.

use std::time::Duration;

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the core utilities.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation did not complete within its declared maximum duration.
    ///
    /// This is a transient failure: callers count it against a retry budget
    /// rather than treating it as fatal.
    #[error("operation did not complete within {limit:?}")]
    OperationTimeout {
        /// The declared maximum duration that was exceeded.
        limit: Duration,
    },

    /// A relay coordinate string could not be parsed.
    #[error("invalid relay coordinate {value:?}: {reason}")]
    InvalidCoordinate {
        /// The offending input.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl CoreError {
    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::OperationTimeout { .. })
    }
}
