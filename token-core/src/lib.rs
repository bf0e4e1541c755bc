//! Token Core
//!
//! Fungible token ledger with a deterministic token factory, recipient
//! notifications and an append-only event journal.
//!
//! # Architecture
//!
//! - **Two-Phase Commits**: Operations are validated into a [`state::Commit`]
//!   before anything changes; applying a commit cannot fail
//! - **Single Writer**: One actor task serializes every operation
//! - **Atomic Persistence**: Each commit is one RocksDB `WriteBatch`
//! - **Closed Recipient Classes**: Plain, accepting (with a handler) or
//!   non-accepting
//!
//! # Invariants
//!
//! - Supply conservation: Σ(balances) == total_supply for every token
//! - No negative balances: amounts are unsigned and debits are checked
//! - Atomicity: a rejected transfer leaves balances and journal untouched
//! - Gap-free journal: record sequence numbers start at 0 and never skip

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications, clippy::all)]

pub mod actor;
pub mod balances;
pub mod config;
pub mod error;
pub mod factory;
pub mod ledger;
pub mod metrics;
pub mod recipient;
pub mod registry;
pub mod state;
pub mod storage;
pub mod token;
pub mod transfer;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use factory::{token_address, CreateToken, TokenFactory};
pub use ledger::{Ledger, TokenClient};
pub use metrics::Metrics;
pub use recipient::{
    CallRecorder, NotificationContext, RecipientDirectory, RecipientKind, RejectingReceiver,
    Revert, TokenReceiver,
};
pub use registry::TokenRegistry;
pub use state::{LedgerState, TokenCreated};
pub use storage::Storage;
pub use token::Token;
pub use transfer::{TransferReceipt, TransferRequest};
pub use types::{AccountId, Amount, EventKind, EventRecord};
