//! Error types for the state machine engine.

use thiserror::Error;

use boardpool_store::StoreError;

/// A result type using `MachineError`.
pub type Result<T> = std::result::Result<T, MachineError>;

/// Errors surfaced by event and timeout dispatch.
///
/// The engine never swallows handler failures; they propagate to whoever
/// delivered the event. The driver catches and logs them per entity so one
/// bad entity cannot stop the polling pass.
#[derive(Debug, Error)]
pub enum MachineError {
    /// Storage layer failure, including `NotFound` for unknown entities.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A transition targeted a state name that was never registered.
    #[error("{machine} machine has no state named {state:?}")]
    UnknownState {
        /// Which machine type was involved.
        machine: &'static str,
        /// The unregistered state name.
        state: String,
    },
}

impl MachineError {
    /// Returns true if the underlying cause is a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}
