//! Main ledger orchestration layer
//!
//! This module ties together configuration, storage, metrics and the actor
//! into a high-level API for creating and moving tokens.
//!
//! # Example
//!
//! ```no_run
//! use token_core::{AccountId, Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> token_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let owner = AccountId::random();
//!     let created = ledger.create_token(owner, "Asset Token", "CLR", 18, 1000).await?;
//!
//!     let token = ledger.token(created.token);
//!     token.transfer(owner, AccountId::random(), 50).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    factory::CreateToken,
    metrics::Metrics,
    recipient::TokenReceiver,
    registry::TokenRegistry,
    state::{LedgerState, TokenCreated},
    transfer::{TransferReceipt, TransferRequest},
    types::{AccountId, Amount, EventRecord},
    Config, Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for async operations
    handle: LedgerHandle,

    /// Metrics shared with the actor
    metrics: Metrics,

    /// Factory address
    factory: AccountId,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// With persistence enabled, the state stored under the data directory
    /// is loaded and verified before the actor starts.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let factory = config.factory_address();
        let metrics = Metrics::new()
            .map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        let (state, storage) = if config.storage.enabled {
            let storage = Storage::open(&config)?;
            let recovered = storage.load()?;
            (LedgerState::restore(factory, recovered)?, Some(storage))
        } else {
            (LedgerState::new(factory), None)
        };

        let handle = spawn_ledger_actor(state, storage, metrics.clone(), config.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            factory = %factory,
            persistent = config.storage.enabled,
            "Token ledger opened"
        );

        Ok(Self {
            handle,
            metrics,
            factory,
            config,
        })
    }

    /// Factory address
    pub fn factory_address(&self) -> AccountId {
        self.factory
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Raw actor handle
    pub fn handle(&self) -> LedgerHandle {
        self.handle.clone()
    }

    /// Client bound to one token address
    ///
    /// The address is not checked here; operations on an unknown address
    /// fail with [`Error::TokenNotFound`].
    pub fn token(&self, address: AccountId) -> TokenClient {
        TokenClient {
            handle: self.handle.clone(),
            address,
        }
    }

    // Factory

    /// Create a token owned by `owner`
    ///
    /// `initial_supply` is in whole units; the owner is credited with
    /// `initial_supply * 10^decimals`.
    pub async fn create_token(
        &self,
        owner: AccountId,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
        initial_supply: Amount,
    ) -> Result<TokenCreated> {
        self.handle
            .create_token(CreateToken::new(owner, name, symbol, decimals, initial_supply))
            .await
    }

    /// Addresses of all created tokens, in creation order
    pub async fn tokens(&self) -> Result<Vec<AccountId>> {
        self.handle.tokens().await
    }

    // Transfers

    /// Move `value` from `from` to `to`
    pub async fn transfer(
        &self,
        token: AccountId,
        from: AccountId,
        to: AccountId,
        value: Amount,
    ) -> Result<TransferReceipt> {
        self.handle
            .transfer(TransferRequest::new(token, from, to, value))
            .await
    }

    /// Move `value` and forward `data` to an accepting recipient
    pub async fn transfer_with_data(
        &self,
        token: AccountId,
        from: AccountId,
        to: AccountId,
        value: Amount,
        data: impl Into<Vec<u8>>,
    ) -> Result<TransferReceipt> {
        self.handle
            .transfer(TransferRequest::new(token, from, to, value).with_data(data))
            .await
    }

    // Token queries

    /// Token metadata
    pub async fn token_info(&self, token: AccountId) -> Result<TokenRegistry> {
        self.handle.token_info(token).await
    }

    /// Token name
    pub async fn name(&self, token: AccountId) -> Result<String> {
        Ok(self.token_info(token).await?.name().to_string())
    }

    /// Token symbol
    pub async fn symbol(&self, token: AccountId) -> Result<String> {
        Ok(self.token_info(token).await?.symbol().to_string())
    }

    /// Token display precision
    pub async fn decimals(&self, token: AccountId) -> Result<u8> {
        Ok(self.token_info(token).await?.decimals())
    }

    /// Raw total supply
    pub async fn total_supply(&self, token: AccountId) -> Result<Amount> {
        Ok(self.token_info(token).await?.total_supply())
    }

    /// Raw balance of `account` (zero if never credited)
    pub async fn balance_of(&self, token: AccountId, account: AccountId) -> Result<Amount> {
        self.handle.balance_of(token, account).await
    }

    /// Verify that balances of `token` sum to its supply
    pub async fn check_conservation(&self, token: AccountId) -> Result<()> {
        self.handle.check_conservation(token).await
    }

    // Journal

    /// Up to `limit` records starting at `sequence`
    pub async fn events_since(&self, sequence: u64, limit: usize) -> Result<Vec<EventRecord>> {
        self.handle.events_since(sequence, limit).await
    }

    /// All records emitted by `emitter`
    pub async fn events_for(&self, emitter: AccountId) -> Result<Vec<EventRecord>> {
        self.handle.events_for(emitter).await
    }

    // Recipients

    /// Attach a receive handler to `account`
    ///
    /// The accepting class is persisted but the handler is not. After a
    /// reopen the account refuses transfers until a handler is registered
    /// again. Token addresses are refused with `InvalidAddress`.
    pub async fn register_receiver(
        &self,
        account: AccountId,
        receiver: impl TokenReceiver + 'static,
    ) -> Result<()> {
        self.handle
            .register_receiver(account, Arc::new(receiver))
            .await
    }

    /// Mark `account` as a program that cannot receive tokens
    pub async fn register_non_accepting(&self, account: AccountId) -> Result<()> {
        self.handle.register_non_accepting(account).await
    }

    /// Turn `account` back into a plain account
    ///
    /// Returns false if nothing was registered or `account` is a token.
    pub async fn unregister(&self, account: AccountId) -> Result<bool> {
        self.handle.unregister(account).await
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

/// Client bound to one token
#[derive(Clone)]
pub struct TokenClient {
    handle: LedgerHandle,
    address: AccountId,
}

impl TokenClient {
    /// Token address
    pub fn address(&self) -> AccountId {
        self.address
    }

    /// Token metadata
    pub async fn info(&self) -> Result<TokenRegistry> {
        self.handle.token_info(self.address).await
    }

    /// Token name
    pub async fn name(&self) -> Result<String> {
        Ok(self.info().await?.name().to_string())
    }

    /// Token symbol
    pub async fn symbol(&self) -> Result<String> {
        Ok(self.info().await?.symbol().to_string())
    }

    /// Token display precision
    pub async fn decimals(&self) -> Result<u8> {
        Ok(self.info().await?.decimals())
    }

    /// Raw total supply
    pub async fn total_supply(&self) -> Result<Amount> {
        Ok(self.info().await?.total_supply())
    }

    /// Raw balance of `account`
    pub async fn balance_of(&self, account: AccountId) -> Result<Amount> {
        self.handle.balance_of(self.address, account).await
    }

    /// Balance of `account` in whole units
    pub async fn display_balance(&self, account: AccountId) -> Result<Decimal> {
        let info = self.info().await?;
        let raw = self.balance_of(account).await?;
        info.display_amount(raw)
    }

    /// Move `value` from `from` to `to`
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        value: Amount,
    ) -> Result<TransferReceipt> {
        self.handle
            .transfer(TransferRequest::new(self.address, from, to, value))
            .await
    }

    /// Move `value` and forward `data` to an accepting recipient
    pub async fn transfer_with_data(
        &self,
        from: AccountId,
        to: AccountId,
        value: Amount,
        data: impl Into<Vec<u8>>,
    ) -> Result<TransferReceipt> {
        self.handle
            .transfer(TransferRequest::new(self.address, from, to, value).with_data(data))
            .await
    }

    /// Records emitted by this token
    pub async fn events(&self) -> Result<Vec<EventRecord>> {
        self.handle.events_for(self.address).await
    }
}
