//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns all ledger state; every operation runs to completion
//!   (including nested receive handlers) before the next one starts
//! - Commits are persisted before they are applied in memory
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │             Ledger / TokenClient callers             │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                   │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)               │
//! │                                                      │
//! │   LedgerState::prepare_*()  ──► Commit               │
//! │                                  │                   │
//! │   Storage::commit() (WriteBatch) ◄┘                  │
//! │                                  │                   │
//! │   LedgerState::apply()       ◄───┘                   │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::factory::CreateToken;
use crate::metrics::Metrics;
use crate::recipient::{RecipientClass, TokenReceiver};
use crate::registry::TokenRegistry;
use crate::state::{created_from_commit, Commit, LedgerState, TokenCreated};
use crate::transfer::{TransferReceipt, TransferRequest};
use crate::types::{AccountId, Amount, EventRecord};
use crate::{Error, Result, Storage};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Create a token
    CreateToken {
        request: CreateToken,
        response: oneshot::Sender<Result<TokenCreated>>,
    },

    /// Transfer between accounts
    Transfer {
        request: TransferRequest,
        response: oneshot::Sender<Result<TransferReceipt>>,
    },

    /// Get token metadata
    TokenInfo {
        token: AccountId,
        response: oneshot::Sender<Result<TokenRegistry>>,
    },

    /// Get a balance
    BalanceOf {
        token: AccountId,
        account: AccountId,
        response: oneshot::Sender<Result<Amount>>,
    },

    /// List created tokens
    Tokens {
        response: oneshot::Sender<Vec<AccountId>>,
    },

    /// Read the journal from a sequence number
    EventsSince {
        sequence: u64,
        limit: usize,
        response: oneshot::Sender<Vec<EventRecord>>,
    },

    /// Read all records of one emitter
    EventsFor {
        emitter: AccountId,
        response: oneshot::Sender<Vec<EventRecord>>,
    },

    /// Register a receive handler
    RegisterReceiver {
        account: AccountId,
        receiver: Arc<dyn TokenReceiver>,
        response: oneshot::Sender<Result<()>>,
    },

    /// Mark an account as unable to receive
    RegisterNonAccepting {
        account: AccountId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Turn an account back into a plain account
    Unregister {
        account: AccountId,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Verify supply conservation of a token
    CheckConservation {
        token: AccountId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor (acknowledged once storage is closed)
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// In-memory state
    state: LedgerState,

    /// Storage backend (None when running in memory)
    storage: Option<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        state: LedgerState,
        storage: Option<Storage>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            state,
            storage,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut shutdown_ack = None;

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown { response } => {
                    shutdown_ack = Some(response);
                    break;
                }
                msg => self.handle_message(msg),
            }
        }

        // Release the database before acknowledging
        drop(self.storage.take());
        tracing::info!("Token ledger actor stopped");

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::CreateToken { request, response } => {
                let result = self.create_token(request);
                let _ = response.send(result);
            }

            LedgerMessage::Transfer { request, response } => {
                let result = self.transfer(request);
                let _ = response.send(result);
            }

            LedgerMessage::TokenInfo { token, response } => {
                let result = self.state.token(&token).map(|t| t.registry().clone());
                let _ = response.send(result);
            }

            LedgerMessage::BalanceOf {
                token,
                account,
                response,
            } => {
                let _ = response.send(self.state.balance_of(&token, &account));
            }

            LedgerMessage::Tokens { response } => {
                let _ = response.send(self.state.factory().tokens().to_vec());
            }

            LedgerMessage::EventsSince {
                sequence,
                limit,
                response,
            } => {
                let _ = response.send(self.state.events_since(sequence, limit));
            }

            LedgerMessage::EventsFor { emitter, response } => {
                let _ = response.send(self.state.events_for(&emitter));
            }

            LedgerMessage::RegisterReceiver {
                account,
                receiver,
                response,
            } => {
                let result = self.register(account, RecipientClass::Accepting).map(|()| {
                    self.state.attach_receiver(account, receiver);
                });
                let _ = response.send(result);
            }

            LedgerMessage::RegisterNonAccepting { account, response } => {
                let result = self.register(account, RecipientClass::NonAccepting);
                let _ = response.send(result);
            }

            LedgerMessage::Unregister { account, response } => {
                let _ = response.send(self.unregister(&account));
            }

            LedgerMessage::CheckConservation { token, response } => {
                let _ = response.send(self.state.check_conservation(&token));
            }

            LedgerMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    fn create_token(&mut self, request: CreateToken) -> Result<TokenCreated> {
        let commit = self.state.prepare_create(&request).map_err(|e| {
            tracing::warn!(owner = %request.owner, error = %e, "Token creation rejected");
            e
        })?;
        self.commit(&commit)?;

        let created = created_from_commit(commit)?;
        self.metrics.record_token_created();
        tracing::info!(
            token = %created.token,
            owner = %request.owner,
            symbol = %request.symbol,
            "Token created"
        );

        Ok(created)
    }

    fn transfer(&mut self, request: TransferRequest) -> Result<TransferReceipt> {
        let started = Instant::now();

        let (commit, notified) = match self.state.prepare_transfer(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.metrics.record_rejection(e.kind());
                tracing::debug!(
                    token = %request.token,
                    from = %request.from,
                    to = %request.to,
                    value = %request.value,
                    error = %e,
                    "Transfer rejected"
                );
                return Err(e);
            }
        };
        self.commit(&commit)?;

        self.metrics
            .record_transfer(notified, started.elapsed().as_secs_f64());
        tracing::debug!(
            token = %request.token,
            from = %request.from,
            to = %request.to,
            value = %request.value,
            notified,
            "Transfer committed"
        );

        TransferReceipt::from_records(commit.records)
    }

    fn register(&mut self, account: AccountId, class: RecipientClass) -> Result<()> {
        let commit = self
            .state
            .prepare_registration(account, Some(class))
            .map_err(|e| {
                tracing::warn!(account = %account, error = %e, "Registration rejected");
                e
            })?;
        self.commit(&commit)?;
        tracing::debug!(account = %account, class = ?class, "Recipient registered");
        Ok(())
    }

    fn unregister(&mut self, account: &AccountId) -> Result<bool> {
        match self.state.prepare_unregister(account) {
            Some(commit) => {
                self.commit(&commit)?;
                tracing::debug!(account = %account, "Recipient unregistered");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Persist then apply
    fn commit(&mut self, commit: &Commit) -> Result<()> {
        if let Some(storage) = &self.storage {
            storage.commit(commit).map_err(|e| {
                tracing::error!(error = %e, "Failed to persist commit");
                e
            })?;
        }
        self.state.apply(commit);
        Ok(())
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Create a token
    pub async fn create_token(&self, request: CreateToken) -> Result<TokenCreated> {
        self.request(|response| LedgerMessage::CreateToken { request, response })
            .await?
    }

    /// Transfer between accounts
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        self.request(|response| LedgerMessage::Transfer { request, response })
            .await?
    }

    /// Get token metadata
    pub async fn token_info(&self, token: AccountId) -> Result<TokenRegistry> {
        self.request(|response| LedgerMessage::TokenInfo { token, response })
            .await?
    }

    /// Get a balance
    pub async fn balance_of(&self, token: AccountId, account: AccountId) -> Result<Amount> {
        self.request(|response| LedgerMessage::BalanceOf {
            token,
            account,
            response,
        })
        .await?
    }

    /// List created tokens
    pub async fn tokens(&self) -> Result<Vec<AccountId>> {
        self.request(|response| LedgerMessage::Tokens { response })
            .await
    }

    /// Read the journal from a sequence number
    pub async fn events_since(&self, sequence: u64, limit: usize) -> Result<Vec<EventRecord>> {
        self.request(|response| LedgerMessage::EventsSince {
            sequence,
            limit,
            response,
        })
        .await
    }

    /// Read all records of one emitter
    pub async fn events_for(&self, emitter: AccountId) -> Result<Vec<EventRecord>> {
        self.request(|response| LedgerMessage::EventsFor { emitter, response })
            .await
    }

    /// Register a receive handler
    pub async fn register_receiver(
        &self,
        account: AccountId,
        receiver: Arc<dyn TokenReceiver>,
    ) -> Result<()> {
        self.request(|response| LedgerMessage::RegisterReceiver {
            account,
            receiver,
            response,
        })
        .await?
    }

    /// Mark an account as unable to receive
    pub async fn register_non_accepting(&self, account: AccountId) -> Result<()> {
        self.request(|response| LedgerMessage::RegisterNonAccepting { account, response })
            .await?
    }

    /// Turn an account back into a plain account
    pub async fn unregister(&self, account: AccountId) -> Result<bool> {
        self.request(|response| LedgerMessage::Unregister { account, response })
            .await?
    }

    /// Verify supply conservation of a token
    pub async fn check_conservation(&self, token: AccountId) -> Result<()> {
        self.request(|response| LedgerMessage::CheckConservation { token, response })
            .await?
    }

    /// Shutdown actor and wait until storage is released
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| LedgerMessage::Shutdown { response })
            .await
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    state: LedgerState,
    storage: Option<Storage>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(state, storage, metrics, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::{CallRecorder, NotificationContext, Revert};
    use crate::types::EventKind;
    use crate::Config;

    struct PanickingReceiver;

    impl TokenReceiver for PanickingReceiver {
        fn on_token_received(
            &self,
            _ctx: &mut NotificationContext,
            _from: AccountId,
            _value: Amount,
            _data: &[u8],
        ) -> std::result::Result<(), Revert> {
            panic!("handler bug");
        }
    }

    fn persistent_config() -> (Config, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.enabled = true;
        config.storage.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn spawn_in_memory() -> LedgerHandle {
        let state = LedgerState::new(AccountId::derive(b"factory"));
        spawn_ledger_actor(state, None, Metrics::new().unwrap(), 16)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let handle = spawn_in_memory();
        handle.shutdown().await.unwrap();

        // Mailbox closed afterwards
        let err = handle.tokens().await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }

    #[tokio::test]
    async fn test_actor_create_and_transfer() {
        let handle = spawn_in_memory();
        let owner = AccountId::random();
        let recipient = AccountId::random();

        let created = handle
            .create_token(CreateToken::new(owner, "Asset Token", "CLR", 18, 1000))
            .await
            .unwrap();

        let receipt = handle
            .transfer(TransferRequest::new(created.token, owner, recipient, 100))
            .await
            .unwrap();
        assert_eq!(receipt.transfer.sequence, 1);

        assert_eq!(
            handle.balance_of(created.token, recipient).await.unwrap(),
            100
        );
        handle.check_conservation(created.token).await.unwrap();

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_routes_notifications() {
        let handle = spawn_in_memory();
        let owner = AccountId::random();
        let receiver = AccountId::random();

        let created = handle
            .create_token(CreateToken::new(owner, "Asset Token", "CLR", 0, 100))
            .await
            .unwrap();
        handle
            .register_receiver(receiver, Arc::new(CallRecorder))
            .await
            .unwrap();

        handle
            .transfer(TransferRequest::new(created.token, owner, receiver, 5))
            .await
            .unwrap();

        let events = handle.events_for(receiver).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::Called { value: 5, .. }));

        assert!(handle.unregister(receiver).await.unwrap());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_persists_commits() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.enabled = true;
        config.storage.data_dir = temp_dir.path().to_path_buf();

        let owner = AccountId::random();
        let token = {
            let storage = Storage::open(&config).unwrap();
            let state = LedgerState::new(config.factory_address());
            let handle = spawn_ledger_actor(state, Some(storage), Metrics::new().unwrap(), 16);

            let created = handle
                .create_token(CreateToken::new(owner, "Asset Token", "CLR", 0, 100))
                .await
                .unwrap();
            handle.shutdown().await.unwrap();
            created.token
        };

        // Database lock released by shutdown
        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.get_balance(&token, &owner).unwrap(), 100);
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_state_untouched() {
        let (config, _temp) = persistent_config();
        let mut storage = Storage::open(&config).unwrap();
        storage.drop_column_family("events").unwrap();

        let metrics = Metrics::new().unwrap();
        let state = LedgerState::new(config.factory_address());
        let handle = spawn_ledger_actor(state, Some(storage), metrics.clone(), 16);

        let owner = AccountId::random();
        let err = handle
            .create_token(CreateToken::new(owner, "Asset Token", "CLR", 0, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        assert!(handle.tokens().await.unwrap().is_empty());
        assert!(handle.events_since(0, usize::MAX).await.unwrap().is_empty());
        assert_eq!(metrics.tokens_created.get(), 0);

        let err = handle
            .register_non_accepting(AccountId::random())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_only_its_transfer() {
        let handle = spawn_in_memory();
        let owner = AccountId::random();
        let receiver = AccountId::random();

        let created = handle
            .create_token(CreateToken::new(owner, "Asset Token", "CLR", 0, 100))
            .await
            .unwrap();
        handle
            .register_receiver(receiver, Arc::new(PanickingReceiver))
            .await
            .unwrap();

        let err = handle
            .transfer(TransferRequest::new(created.token, owner, receiver, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotificationHandlerFailure { .. }));

        // Actor keeps serving
        assert_eq!(handle.balance_of(created.token, owner).await.unwrap(), 100);
        handle
            .transfer(TransferRequest::new(created.token, owner, AccountId::random(), 5))
            .await
            .unwrap();

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_token_address_registration_refused() {
        let handle = spawn_in_memory();
        let owner = AccountId::random();
        let created = handle
            .create_token(CreateToken::new(owner, "Asset Token", "CLR", 0, 100))
            .await
            .unwrap();

        let err = handle
            .register_receiver(created.token, Arc::new(CallRecorder))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
        assert!(!handle.unregister(created.token).await.unwrap());

        let err = handle
            .transfer(TransferRequest::new(created.token, owner, created.token, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecipientCannotReceive(_)));

        handle.shutdown().await.unwrap();
    }
}
