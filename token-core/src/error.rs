//! Error types for the token ledger

use crate::types::{AccountId, Amount};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Every error returned by a mutating operation leaves the ledger exactly
/// as it was before the call.
#[derive(Error, Debug)]
pub enum Error {
    /// Sender balance below the requested value
    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Balance held by the sender
        have: Amount,
        /// Value requested
        need: Amount,
    },

    /// Destination is a programmable account without a receive handler
    #[error("Recipient cannot receive tokens: {0}")]
    RecipientCannotReceive(AccountId),

    /// Destination handler reverted
    #[error("Notification handler of {recipient} failed: {reason}")]
    NotificationHandlerFailure {
        /// Recipient whose handler reverted
        recipient: AccountId,
        /// Revert reason reported by the handler
        reason: String,
    },

    /// Token not found
    #[error("Token not found: {0}")]
    TokenNotFound(AccountId),

    /// Scaled supply does not fit in an amount
    #[error("Supply overflow: {supply} scaled by 10^{decimals}")]
    SupplyOverflow {
        /// Requested whole-unit supply
        supply: Amount,
        /// Decimal precision
        decimals: u8,
    },

    /// Arithmetic overflow on a balance
    #[error("Arithmetic overflow")]
    Overflow,

    /// Amount cannot be represented for display
    #[error("Display range error: {0}")]
    DisplayRange(String),

    /// Malformed account identifier
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invariant violation (supply conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for domain rejections (the call was refused), false for
    /// infrastructure faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. }
                | Error::RecipientCannotReceive(_)
                | Error::NotificationHandlerFailure { .. }
                | Error::TokenNotFound(_)
                | Error::SupplyOverflow { .. }
                | Error::Overflow
                | Error::InvalidAddress(_)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::RecipientCannotReceive(_) => "recipient_cannot_receive",
            Error::NotificationHandlerFailure { .. } => "handler_failure",
            Error::TokenNotFound(_) => "token_not_found",
            Error::SupplyOverflow { .. } => "supply_overflow",
            Error::Overflow => "overflow",
            Error::DisplayRange(_) => "display_range",
            Error::InvalidAddress(_) => "invalid_address",
            Error::InvariantViolation(_) => "invariant_violation",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
