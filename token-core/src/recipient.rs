//! Recipient notification protocol
//!
//! Accounts fall into three closed classes, resolved through the
//! [`RecipientDirectory`] at transfer time:
//!
//! - **Plain**: holds value passively, never notified (the default)
//! - **Accepting**: programmable account with a [`TokenReceiver`] handler
//!   invoked synchronously after being credited
//! - **NonAccepting**: programmable account without a handler; any
//!   transfer into it is rejected
//!
//! Handlers emit records through a [`NotificationContext`]. The records are
//! buffered and only reach the journal if the enclosing transfer commits.

use crate::types::{AccountId, Amount, EventKind, PendingEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure signalled by a receive handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct Revert {
    /// Human-readable reason
    pub reason: String,
}

impl Revert {
    /// Create a revert with a reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Receive handler of a programmable account
pub trait TokenReceiver: Send + Sync {
    /// Called after `value` units from `from` have been staged for the
    /// recipient. Returning an error aborts the whole transfer.
    ///
    /// A panic is caught and treated like a revert with the panic message
    /// as reason.
    fn on_token_received(
        &self,
        ctx: &mut NotificationContext,
        from: AccountId,
        value: Amount,
        data: &[u8],
    ) -> Result<(), Revert>;
}

/// Handle passed to a receive handler
#[derive(Debug)]
pub struct NotificationContext {
    token: AccountId,
    recipient: AccountId,
    emitted: Vec<PendingEvent>,
}

impl NotificationContext {
    pub(crate) fn new(token: AccountId, recipient: AccountId) -> Self {
        Self {
            token,
            recipient,
            emitted: Vec::new(),
        }
    }

    /// Token being transferred
    pub fn token(&self) -> AccountId {
        self.token
    }

    /// Account whose handler is running
    pub fn recipient(&self) -> AccountId {
        self.recipient
    }

    /// Emit a record attributed to the recipient
    pub fn emit(&mut self, kind: EventKind) {
        self.emitted.push(PendingEvent {
            emitter: self.recipient,
            kind,
        });
    }

    /// Emit a `Called` record
    pub fn emit_called(&mut self, from: AccountId, data: &[u8], value: Amount) {
        self.emit(EventKind::Called {
            from,
            data: data.to_vec(),
            value,
        });
    }

    pub(crate) fn into_events(self) -> Vec<PendingEvent> {
        self.emitted
    }
}

/// Classification of a destination account
#[derive(Clone)]
pub enum RecipientKind {
    /// Holds value passively
    Plain,
    /// Programmable account with a receive handler
    Accepting(Arc<dyn TokenReceiver>),
    /// Programmable account that cannot receive
    NonAccepting,
}

impl fmt::Debug for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientKind::Plain => write!(f, "Plain"),
            RecipientKind::Accepting(_) => write!(f, "Accepting(..)"),
            RecipientKind::NonAccepting => write!(f, "NonAccepting"),
        }
    }
}

/// Stored class of a programmable account
///
/// Handlers are runtime objects; only the class survives a restart. An
/// `Accepting` account restored from storage cannot receive until a
/// handler is registered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientClass {
    /// Registered with a receive handler
    Accepting,
    /// Registered without a receive handler
    NonAccepting,
}

/// Registry of programmable accounts
#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    entries: HashMap<AccountId, RecipientKind>,
}

impl RecipientDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a receive handler for an account
    pub fn register_receiver(&mut self, account: AccountId, receiver: Arc<dyn TokenReceiver>) {
        self.entries.insert(account, RecipientKind::Accepting(receiver));
    }

    /// Mark an account as programmable without a receive handler
    pub fn register_non_accepting(&mut self, account: AccountId) {
        self.entries.insert(account, RecipientKind::NonAccepting);
    }

    /// Turn an account back into a plain account
    pub fn unregister(&mut self, account: &AccountId) -> Option<RecipientKind> {
        self.entries.remove(account)
    }

    /// Resolve the class of an account (unregistered accounts are plain)
    pub fn resolve(&self, account: &AccountId) -> RecipientKind {
        self.entries
            .get(account)
            .cloned()
            .unwrap_or(RecipientKind::Plain)
    }

    /// Install a stored class; accepting accounts start detached
    pub fn restore(&mut self, account: AccountId, class: RecipientClass) {
        if class == RecipientClass::Accepting {
            tracing::info!(account = %account, "Receive handler detached until registered again");
        }
        self.register_non_accepting(account);
    }

    /// Whether the account runs custom logic on receipt
    pub fn is_programmable(&self, account: &AccountId) -> bool {
        self.entries.contains_key(account)
    }
}

/// Receiver that acknowledges every transfer with a `Called` record
#[derive(Debug, Clone, Copy, Default)]
pub struct CallRecorder;

impl TokenReceiver for CallRecorder {
    fn on_token_received(
        &self,
        ctx: &mut NotificationContext,
        from: AccountId,
        value: Amount,
        data: &[u8],
    ) -> Result<(), Revert> {
        ctx.emit_called(from, data, value);
        Ok(())
    }
}

/// Receiver that reverts every transfer
#[derive(Debug, Clone)]
pub struct RejectingReceiver {
    reason: String,
}

impl RejectingReceiver {
    /// Create with a fixed revert reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl TokenReceiver for RejectingReceiver {
    fn on_token_received(
        &self,
        ctx: &mut NotificationContext,
        from: AccountId,
        value: Amount,
        data: &[u8],
    ) -> Result<(), Revert> {
        // Emitted records are discarded along with the transfer
        ctx.emit_called(from, data, value);
        Err(Revert::new(self.reason.clone()))
    }
}
