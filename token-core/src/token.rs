//! A token instance: immutable metadata plus its balance store

use crate::balances::BalanceStore;
use crate::registry::TokenRegistry;
use crate::types::{AccountId, Amount};
use crate::{Error, Result};

/// Registry and balances of one token, created together by the factory
#[derive(Debug, Clone)]
pub struct Token {
    registry: TokenRegistry,
    balances: BalanceStore,
}

impl Token {
    /// Wrap metadata with an empty balance store
    pub(crate) fn new(registry: TokenRegistry) -> Self {
        Self {
            registry,
            balances: BalanceStore::new(),
        }
    }

    /// Token address
    pub fn address(&self) -> AccountId {
        self.registry.address()
    }

    /// Metadata
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Balances
    pub fn balances(&self) -> &BalanceStore {
        &self.balances
    }

    pub(crate) fn balances_mut(&mut self) -> &mut BalanceStore {
        &mut self.balances
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        self.registry.name()
    }

    /// Ticker symbol
    pub fn symbol(&self) -> &str {
        self.registry.symbol()
    }

    /// Display precision
    pub fn decimals(&self) -> u8 {
        self.registry.decimals()
    }

    /// Scaled total supply
    pub fn total_supply(&self) -> Amount {
        self.registry.total_supply()
    }

    /// Balance of an account
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.balance_of(account)
    }

    /// Check that the balances sum to the total supply
    pub fn check_conservation(&self) -> Result<()> {
        let total = self.balances.total()?;
        if total != self.total_supply() {
            return Err(Error::InvariantViolation(format!(
                "token {}: balances sum to {}, total supply is {}",
                self.address(),
                total,
                self.total_supply()
            )));
        }
        Ok(())
    }
}
