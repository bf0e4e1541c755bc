//! Core types for the token ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (unsigned integers, checked operations)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Raw token amount (smallest indivisible unit)
pub type Amount = u128;

/// Width of an account identifier in bytes
pub const ADDRESS_LEN: usize = 20;

/// Account identifier (fixed-width opaque address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId([u8; ADDRESS_LEN]);

impl AccountId {
    /// The all-zero address
    pub const ZERO: AccountId = AccountId([0u8; ADDRESS_LEN]);

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Derive an address from arbitrary seed material
    ///
    /// The address is the first 20 bytes of SHA-256(seed).
    pub fn derive(seed: &[u8]) -> Self {
        let digest = Sha256::digest(seed);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
        Self(bytes)
    }

    /// Generate a random address
    pub fn random() -> Self {
        Self(rand::random::<[u8; ADDRESS_LEN]>())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| crate::Error::InvalidAddress(format!("{}: {}", s, e)))?;
        let bytes: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            crate::Error::InvalidAddress(format!("{}: expected {} bytes", s, ADDRESS_LEN))
        })?;
        Ok(Self(bytes))
    }
}

/// Observable event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Token created by the factory
    NewToken {
        /// Address of the new token
        token: AccountId,
    },

    /// Value moved between two accounts
    Transfer {
        /// Debited account
        from: AccountId,
        /// Credited account
        to: AccountId,
        /// Raw amount moved
        value: Amount,
    },

    /// Programmable recipient acknowledged a transfer
    Called {
        /// Sender of the transfer that triggered the handler
        from: AccountId,
        /// Auxiliary data passed with the transfer
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Raw amount received
        value: Amount,
    },
}

impl EventKind {
    /// Event name as seen by external monitors
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::NewToken { .. } => "NewToken",
            EventKind::Transfer { .. } => "Transfer",
            EventKind::Called { .. } => "Called",
        }
    }
}

/// Event staged by an operation that has not been committed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    /// Account emitting the event
    pub emitter: AccountId,
    /// Payload
    pub kind: EventKind,
}

/// Committed entry of the append-only event journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the journal (gap-free, starts at 0)
    pub sequence: u64,

    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Account that emitted the event
    pub emitter: AccountId,

    /// Commit timestamp (nanoseconds since Unix epoch)
    pub timestamp_nanos: i64,

    /// Payload
    pub kind: EventKind,
}

impl EventRecord {
    /// Event name as seen by external monitors
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
