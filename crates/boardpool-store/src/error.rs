//! Error types for the storage contract.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Kind of record ("device", "request", ...).
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// A backend failure (connection loss, corrupt row, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Shorthand for a `NotFound` error.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true for errors that mean the record is simply absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
