//! Ledger state machine
//!
//! [`LedgerState`] owns the factory, every token, the recipient directory
//! and the event journal. Mutations are two-phase:
//!
//! 1. `prepare_*` validates and produces a [`Commit`] (no mutation)
//! 2. [`LedgerState::apply`] installs a commit (cannot fail)
//!
//! The actor persists a commit between the two phases, so memory never runs
//! ahead of storage.

use crate::factory::{CreateToken, TokenFactory};
use crate::recipient::{RecipientClass, RecipientDirectory, RecipientKind, TokenReceiver};
use crate::registry::TokenRegistry;
use crate::token::Token;
use crate::transfer::{prepare_transfer, TransferReceipt, TransferRequest};
use crate::types::{AccountId, Amount, EventRecord, PendingEvent};
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Balance update of one account of one token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceWrite {
    /// Token address
    pub token: AccountId,
    /// Account
    pub account: AccountId,
    /// New balance
    pub amount: Amount,
}

/// Class change of a programmable account (`None` makes it plain again)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientWrite {
    /// Account
    pub account: AccountId,
    /// New class
    pub class: Option<RecipientClass>,
}

/// Token created by a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedToken {
    /// Position in creation order
    pub index: u64,
    /// Metadata
    pub registry: TokenRegistry,
}

/// Sealed set of changes produced by one operation
#[derive(Debug, Clone, Default)]
pub struct Commit {
    /// Token created by this commit, if any
    pub created: Option<CreatedToken>,
    /// Balance updates
    pub balance_writes: Vec<BalanceWrite>,
    /// Recipient class changes
    pub recipient_writes: Vec<RecipientWrite>,
    /// Journal records, sequenced
    pub records: Vec<EventRecord>,
}

/// Token creation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCreated {
    /// Address of the new token
    pub token: AccountId,
    /// `NewToken` record
    pub record: EventRecord,
}

/// State recovered from storage
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    /// Created tokens, in creation order
    pub tokens: Vec<CreatedToken>,
    /// Latest balance of every written account
    pub balances: Vec<BalanceWrite>,
    /// Full event journal, in sequence order
    pub events: Vec<EventRecord>,
    /// Registered programmable accounts
    pub recipients: Vec<(AccountId, RecipientClass)>,
}

/// In-memory ledger state
#[derive(Debug)]
pub struct LedgerState {
    factory: TokenFactory,
    tokens: HashMap<AccountId, Token>,
    directory: RecipientDirectory,
    journal: Vec<EventRecord>,
}

impl LedgerState {
    /// Empty ledger with a factory at `factory_address`
    pub fn new(factory_address: AccountId) -> Self {
        Self {
            factory: TokenFactory::new(factory_address),
            tokens: HashMap::new(),
            directory: RecipientDirectory::new(),
            journal: Vec::new(),
        }
    }

    /// Rebuild state from persisted data
    pub fn restore(factory_address: AccountId, recovered: RecoveredState) -> Result<Self> {
        let mut state = Self::new(factory_address);

        for created in recovered.tokens {
            if created.index != state.factory.nonce() {
                return Err(Error::InvariantViolation(format!(
                    "token {} recovered at index {}, expected {}",
                    created.registry.address(),
                    created.index,
                    state.factory.nonce()
                )));
            }
            state.install_token(created.registry);
        }

        for write in recovered.balances {
            state.write_balance(write)?;
        }

        for (account, class) in recovered.recipients {
            if state.tokens.contains_key(&account) {
                return Err(Error::InvariantViolation(format!(
                    "token address {} stored as a {:?} recipient",
                    account, class
                )));
            }
            state.directory.restore(account, class);
        }

        for (position, record) in recovered.events.iter().enumerate() {
            if record.sequence != position as u64 {
                return Err(Error::InvariantViolation(format!(
                    "journal gap: found sequence {} at position {}",
                    record.sequence, position
                )));
            }
        }
        state.journal = recovered.events;

        for token in state.tokens.values() {
            token.check_conservation()?;
        }

        tracing::info!(
            tokens = state.tokens.len(),
            events = state.journal.len(),
            "Ledger state restored"
        );

        Ok(state)
    }

    // Two-phase operations

    /// Validate a token creation
    pub fn prepare_create(&self, request: &CreateToken) -> Result<Commit> {
        let staged = self.factory.prepare(request)?;
        let address = staged.registry.address();
        let supply = staged.registry.total_supply();

        Ok(Commit {
            created: Some(CreatedToken {
                index: staged.index,
                registry: staged.registry,
            }),
            balance_writes: vec![BalanceWrite {
                token: address,
                account: request.owner,
                amount: supply,
            }],
            recipient_writes: Vec::new(),
            records: self.seal(staged.events),
        })
    }

    /// Validate a transfer (runs the recipient's handler, if any)
    pub fn prepare_transfer(&self, request: &TransferRequest) -> Result<(Commit, bool)> {
        let token = self.token(&request.token)?;
        let staged = prepare_transfer(token, &self.directory, request)?;

        let commit = Commit {
            created: None,
            balance_writes: staged
                .writes
                .into_iter()
                .map(|(account, amount)| BalanceWrite {
                    token: request.token,
                    account,
                    amount,
                })
                .collect(),
            recipient_writes: Vec::new(),
            records: self.seal(staged.events),
        };

        Ok((commit, staged.notified))
    }

    /// Validate a recipient class change
    ///
    /// Token addresses are always non-accepting and cannot be registered.
    pub fn prepare_registration(
        &self,
        account: AccountId,
        class: Option<RecipientClass>,
    ) -> Result<Commit> {
        if self.tokens.contains_key(&account) {
            return Err(Error::InvalidAddress(format!(
                "{} is a token address and cannot be registered",
                account
            )));
        }

        Ok(Commit {
            recipient_writes: vec![RecipientWrite { account, class }],
            ..Commit::default()
        })
    }

    /// Install a commit produced by a `prepare_*` call on this state
    pub fn apply(&mut self, commit: &Commit) {
        if let Some(created) = &commit.created {
            self.install_token(created.registry.clone());
        }

        for write in &commit.balance_writes {
            if let Some(token) = self.tokens.get_mut(&write.token) {
                token.balances_mut().set(write.account, write.amount);
            }
        }

        for write in &commit.recipient_writes {
            match write.class {
                Some(RecipientClass::NonAccepting) => {
                    self.directory.register_non_accepting(write.account)
                }
                // Handler is attached by the caller after the commit
                Some(RecipientClass::Accepting) => {
                    if !matches!(
                        self.directory.resolve(&write.account),
                        RecipientKind::Accepting(_)
                    ) {
                        self.directory.register_non_accepting(write.account);
                    }
                }
                None => {
                    self.directory.unregister(&write.account);
                }
            }
        }

        self.journal.extend(commit.records.iter().cloned());
    }

    // One-shot operations for embedders without storage

    /// Create a token (prepare + apply)
    pub fn create_token(&mut self, request: &CreateToken) -> Result<TokenCreated> {
        let commit = self.prepare_create(request)?;
        self.apply(&commit);
        created_from_commit(commit)
    }

    /// Transfer (prepare + apply)
    pub fn transfer(&mut self, request: &TransferRequest) -> Result<TransferReceipt> {
        let (commit, _) = self.prepare_transfer(request)?;
        self.apply(&commit);
        TransferReceipt::from_records(commit.records)
    }

    // Recipient directory

    /// Register a receive handler (prepare + apply + attach)
    pub fn register_receiver(
        &mut self,
        account: AccountId,
        receiver: Arc<dyn TokenReceiver>,
    ) -> Result<()> {
        let commit = self.prepare_registration(account, Some(RecipientClass::Accepting))?;
        self.apply(&commit);
        self.attach_receiver(account, receiver);
        Ok(())
    }

    /// Mark an account as unable to receive (prepare + apply)
    pub fn register_non_accepting(&mut self, account: AccountId) -> Result<()> {
        let commit = self.prepare_registration(account, Some(RecipientClass::NonAccepting))?;
        self.apply(&commit);
        Ok(())
    }

    /// Turn an account back into a plain account
    ///
    /// Returns false if nothing was registered. Token addresses always stay
    /// non-accepting.
    pub fn unregister(&mut self, account: &AccountId) -> bool {
        match self.prepare_unregister(account) {
            Some(commit) => {
                self.apply(&commit);
                true
            }
            None => false,
        }
    }

    /// Commit removing a registration, if there is one to remove
    pub fn prepare_unregister(&self, account: &AccountId) -> Option<Commit> {
        if !self.directory.is_programmable(account) {
            return None;
        }
        self.prepare_registration(*account, None).ok()
    }

    /// Attach a handler once its `Accepting` registration has been applied
    pub(crate) fn attach_receiver(
        &mut self,
        account: AccountId,
        receiver: Arc<dyn TokenReceiver>,
    ) {
        self.directory.register_receiver(account, receiver);
    }

    /// Recipient directory
    pub fn directory(&self) -> &RecipientDirectory {
        &self.directory
    }

    // Queries

    /// Factory
    pub fn factory(&self) -> &TokenFactory {
        &self.factory
    }

    /// Token by address
    pub fn token(&self, address: &AccountId) -> Result<&Token> {
        self.tokens
            .get(address)
            .ok_or(Error::TokenNotFound(*address))
    }

    /// Balance of `account` in `token`
    pub fn balance_of(&self, token: &AccountId, account: &AccountId) -> Result<Amount> {
        Ok(self.token(token)?.balance_of(account))
    }

    /// Verify supply conservation of a token
    pub fn check_conservation(&self, token: &AccountId) -> Result<()> {
        self.token(token)?.check_conservation()
    }

    /// Sequence number the next record will receive
    pub fn next_sequence(&self) -> u64 {
        self.journal.len() as u64
    }

    /// Up to `limit` records starting at `sequence`
    pub fn events_since(&self, sequence: u64, limit: usize) -> Vec<EventRecord> {
        let start = usize::try_from(sequence).unwrap_or(usize::MAX);
        self.journal
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect()
    }

    /// All records emitted by `emitter`
    pub fn events_for(&self, emitter: &AccountId) -> Vec<EventRecord> {
        self.journal
            .iter()
            .filter(|record| record.emitter == *emitter)
            .cloned()
            .collect()
    }

    // Internals

    fn seal(&self, pending: Vec<PendingEvent>) -> Vec<EventRecord> {
        let timestamp_nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let first = self.next_sequence();

        pending
            .into_iter()
            .enumerate()
            .map(|(offset, event)| EventRecord {
                sequence: first + offset as u64,
                event_id: Uuid::now_v7(),
                emitter: event.emitter,
                timestamp_nanos,
                kind: event.kind,
            })
            .collect()
    }

    fn install_token(&mut self, registry: TokenRegistry) {
        let address = registry.address();
        self.factory.record_created(address);
        self.directory.register_non_accepting(address);
        self.tokens.insert(address, Token::new(registry));
    }

    fn write_balance(&mut self, write: BalanceWrite) -> Result<()> {
        let token = self
            .tokens
            .get_mut(&write.token)
            .ok_or(Error::TokenNotFound(write.token))?;
        token.balances_mut().set(write.account, write.amount);
        Ok(())
    }
}

/// Extract the creation result from a committed creation
pub(crate) fn created_from_commit(commit: Commit) -> Result<TokenCreated> {
    let token = commit
        .created
        .as_ref()
        .map(|created| created.registry.address())
        .ok_or_else(|| Error::InvariantViolation("creation commit without token".to_string()))?;
    let record = commit
        .records
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvariantViolation("creation commit without record".to_string()))?;
    Ok(TokenCreated { token, record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::{CallRecorder, RejectingReceiver};
    use crate::types::EventKind;

    fn state_with_token(owner: AccountId) -> (LedgerState, AccountId) {
        let mut state = LedgerState::new(AccountId::derive(b"factory"));
        let created = state
            .create_token(&CreateToken::new(owner, "Asset Token", "CLR", 18, 1000))
            .unwrap();
        (state, created.token)
    }

    #[test]
    fn test_create_token() {
        let owner = AccountId::random();
        let (state, token) = state_with_token(owner);

        let info = state.token(&token).unwrap();
        assert_eq!(info.name(), "Asset Token");
        assert_eq!(info.symbol(), "CLR");
        assert_eq!(info.decimals(), 18);
        assert_eq!(info.total_supply(), 1_000_000_000_000_000_000_000);
        assert_eq!(info.balance_of(&owner), info.total_supply());
        assert_eq!(state.factory().tokens(), &[token]);

        let journal = state.events_since(0, 10);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].sequence, 0);
        assert_eq!(journal[0].kind, EventKind::NewToken { token });
        assert_eq!(journal[0].emitter, state.factory().address());
    }

    #[test]
    fn test_failed_creation_leaves_no_trace() {
        let mut state = LedgerState::new(AccountId::derive(b"factory"));
        let next = state.factory().next_token_address();

        let result = state.create_token(&CreateToken::new(AccountId::random(), "Huge", "H", 40, 1));
        assert!(result.is_err());
        assert_eq!(state.next_sequence(), 0);
        assert_eq!(state.factory().next_token_address(), next);
    }

    #[test]
    fn test_transfer_fund_and_send() {
        let owner = AccountId::random();
        let sender = AccountId::random();
        let recipient = AccountId::random();
        let (mut state, token) = state_with_token(owner);

        state
            .transfer(&TransferRequest::new(token, owner, sender, 100))
            .unwrap();
        let receipt = state
            .transfer(&TransferRequest::new(token, sender, recipient, 50))
            .unwrap();

        assert_eq!(state.balance_of(&token, &sender).unwrap(), 50);
        assert_eq!(state.balance_of(&token, &recipient).unwrap(), 50);
        assert_eq!(
            receipt.transfer.kind,
            EventKind::Transfer {
                from: sender,
                to: recipient,
                value: 50
            }
        );
        assert_eq!(receipt.transfer.emitter, token);
        assert!(receipt.notifications.is_empty());
        state.check_conservation(&token).unwrap();
    }

    #[test]
    fn test_rejected_transfer_is_atomic() {
        let owner = AccountId::random();
        let sender = AccountId::random();
        let receiver = AccountId::random();
        let (mut state, token) = state_with_token(owner);
        state
            .register_receiver(receiver, Arc::new(RejectingReceiver::new("no")))
            .unwrap();

        state
            .transfer(&TransferRequest::new(token, owner, sender, 100))
            .unwrap();
        let before = state.next_sequence();

        let err = state
            .transfer(&TransferRequest::new(token, sender, receiver, 50))
            .unwrap_err();
        assert!(matches!(err, Error::NotificationHandlerFailure { .. }));

        assert_eq!(state.balance_of(&token, &sender).unwrap(), 100);
        assert_eq!(state.balance_of(&token, &receiver).unwrap(), 0);
        assert_eq!(state.next_sequence(), before);
        assert!(state.events_for(&receiver).is_empty());
    }

    #[test]
    fn test_notifications_are_sequenced_after_transfer() {
        let owner = AccountId::random();
        let receiver = AccountId::random();
        let (mut state, token) = state_with_token(owner);
        state
            .register_receiver(receiver, Arc::new(CallRecorder))
            .unwrap();

        let receipt = state
            .transfer(&TransferRequest::new(token, owner, receiver, 50))
            .unwrap();

        assert_eq!(receipt.transfer.sequence, 1);
        assert_eq!(receipt.notifications.len(), 1);
        assert_eq!(receipt.notifications[0].sequence, 2);
        assert_eq!(receipt.notifications[0].emitter, receiver);
    }

    #[test]
    fn test_token_address_cannot_receive() {
        let owner = AccountId::random();
        let (mut state, token) = state_with_token(owner);

        let err = state
            .transfer(&TransferRequest::new(token, owner, token, 1))
            .unwrap_err();
        assert!(matches!(err, Error::RecipientCannotReceive(account) if account == token));

        // Token addresses cannot be turned into plain accounts
        assert!(!state.unregister(&token));
    }

    #[test]
    fn test_token_address_cannot_be_registered() {
        let owner = AccountId::random();
        let (mut state, token) = state_with_token(owner);

        let err = state
            .register_receiver(token, Arc::new(CallRecorder))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
        assert!(matches!(
            state.register_non_accepting(token),
            Err(Error::InvalidAddress(_))
        ));

        // Still refuses its own units
        let err = state
            .transfer(&TransferRequest::new(token, owner, token, 10))
            .unwrap_err();
        assert!(matches!(err, Error::RecipientCannotReceive(account) if account == token));
        assert_eq!(state.balance_of(&token, &token).unwrap(), 0);
    }

    #[test]
    fn test_registration_commits_carry_recipient_writes() {
        let owner = AccountId::random();
        let contract = AccountId::random();
        let (mut state, _) = state_with_token(owner);

        let commit = state
            .prepare_registration(contract, Some(RecipientClass::NonAccepting))
            .unwrap();
        assert_eq!(
            commit.recipient_writes,
            vec![RecipientWrite {
                account: contract,
                class: Some(RecipientClass::NonAccepting)
            }]
        );
        assert!(commit.records.is_empty());

        // Nothing changes before apply
        assert!(!state.directory().is_programmable(&contract));
        state.apply(&commit);
        assert!(matches!(
            state.directory().resolve(&contract),
            RecipientKind::NonAccepting
        ));

        let commit = state.prepare_unregister(&contract).unwrap();
        state.apply(&commit);
        assert!(matches!(state.directory().resolve(&contract), RecipientKind::Plain));
        assert!(state.prepare_unregister(&contract).is_none());
    }

    #[test]
    fn test_unknown_token() {
        let mut state = LedgerState::new(AccountId::derive(b"factory"));
        let unknown = AccountId::random();
        let err = state
            .transfer(&TransferRequest::new(unknown, AccountId::random(), AccountId::random(), 0))
            .unwrap_err();
        assert!(matches!(err, Error::TokenNotFound(account) if account == unknown));
    }

    #[test]
    fn test_restore_rebuilds_state() {
        let owner = AccountId::random();
        let recipient = AccountId::random();
        let receiver = AccountId::random();
        let sink = AccountId::random();
        let (mut state, token) = state_with_token(owner);
        state
            .transfer(&TransferRequest::new(token, owner, recipient, 7))
            .unwrap();

        let registry = state.token(&token).unwrap().registry().clone();
        let balances = state
            .token(&token)
            .unwrap()
            .balances()
            .iter()
            .map(|(account, amount)| BalanceWrite {
                token,
                account: *account,
                amount: *amount,
            })
            .collect();

        let recovered = RecoveredState {
            tokens: vec![CreatedToken { index: 0, registry }],
            balances,
            events: state.events_since(0, usize::MAX),
            recipients: vec![
                (receiver, RecipientClass::Accepting),
                (sink, RecipientClass::NonAccepting),
            ],
        };

        let restored = LedgerState::restore(state.factory().address(), recovered).unwrap();
        assert_eq!(restored.balance_of(&token, &recipient).unwrap(), 7);
        assert_eq!(restored.next_sequence(), state.next_sequence());
        assert_eq!(
            restored.factory().next_token_address(),
            state.factory().next_token_address()
        );
        assert!(matches!(
            restored.directory().resolve(&token),
            RecipientKind::NonAccepting
        ));

        // Programmable accounts keep refusing until a handler is attached
        for account in [receiver, sink] {
            let err = restored
                .prepare_transfer(&TransferRequest::new(token, owner, account, 1))
                .unwrap_err();
            assert!(matches!(err, Error::RecipientCannotReceive(_)));
        }
    }

    #[test]
    fn test_restore_rejects_token_recipient() {
        let owner = AccountId::random();
        let (state, token) = state_with_token(owner);
        let registry = state.token(&token).unwrap().registry().clone();

        let recovered = RecoveredState {
            tokens: vec![CreatedToken { index: 0, registry }],
            balances: vec![BalanceWrite {
                token,
                account: owner,
                amount: state.token(&token).unwrap().total_supply(),
            }],
            events: state.events_since(0, usize::MAX),
            recipients: vec![(token, RecipientClass::Accepting)],
        };

        assert!(matches!(
            LedgerState::restore(state.factory().address(), recovered),
            Err(Error::InvariantViolation(_))
        ));
    }
}
