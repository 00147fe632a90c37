//! Error types for relay board operations.

use thiserror::Error;

/// A result type using `RelayError`.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while talking to a relay board.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The operation's overall deadline elapsed mid-conversation.
    #[error("relay operation timed out")]
    Timeout,

    /// The board closed the connection before replying.
    #[error("connection to relay board lost")]
    ConnectionLost,

    /// The board's reply was not the expected acknowledgement byte.
    #[error("unexpected reply from relay board: {0:#04x}")]
    Protocol(u8),

    /// Bank or relay number outside the board's addressable range.
    #[error("bank {bank} or relay {relay} out of range (banks 1-4, relays 1-8)")]
    BadCoordinate {
        /// The requested bank.
        bank: u8,
        /// The requested relay.
        relay: u8,
    },

    /// Socket-level failure (refused connection, reset, ...).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Returns true for failures worth retrying on a later attempt.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        !matches!(self, Self::BadCoordinate { .. })
    }
}
