//! Token factory
//!
//! Creates tokens at deterministic addresses. The address of the n-th
//! token is the first 20 bytes of `SHA-256(factory_address || n)`, with
//! `n` encoded as a big-endian u64. `n` only advances when a creation
//! commits, so a rejected creation does not consume an address.

use crate::registry::TokenRegistry;
use crate::types::{AccountId, Amount, EventKind, PendingEvent};
use crate::Result;

/// Parameters of a token creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateToken {
    /// Creating account, credited with the whole supply
    pub owner: AccountId,
    /// Human-readable name
    pub name: String,
    /// Ticker symbol
    pub symbol: String,
    /// Display precision
    pub decimals: u8,
    /// Supply in whole units (scaled by `10^decimals`)
    pub initial_supply: Amount,
}

impl CreateToken {
    /// Build a creation request
    pub fn new(
        owner: AccountId,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
        initial_supply: Amount,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            symbol: symbol.into(),
            decimals,
            initial_supply,
        }
    }
}

/// Validated, uncommitted token creation
#[derive(Debug, Clone)]
pub struct StagedCreation {
    /// Position of the token in creation order
    pub index: u64,
    /// Metadata of the new token
    pub registry: TokenRegistry,
    /// `NewToken` record
    pub events: Vec<PendingEvent>,
}

/// Factory state: its own address and the tokens it created
#[derive(Debug, Clone)]
pub struct TokenFactory {
    address: AccountId,
    tokens: Vec<AccountId>,
}

impl TokenFactory {
    /// Create a factory living at `address`
    pub fn new(address: AccountId) -> Self {
        Self {
            address,
            tokens: Vec::new(),
        }
    }

    /// Factory address (emitter of `NewToken`)
    pub fn address(&self) -> AccountId {
        self.address
    }

    /// Number of tokens created so far
    pub fn nonce(&self) -> u64 {
        self.tokens.len() as u64
    }

    /// Addresses of created tokens, in creation order
    pub fn tokens(&self) -> &[AccountId] {
        &self.tokens
    }

    /// Address the next created token will receive
    pub fn next_token_address(&self) -> AccountId {
        token_address(&self.address, self.nonce())
    }

    /// Validate a creation without changing the factory
    pub fn prepare(&self, request: &CreateToken) -> Result<StagedCreation> {
        let address = self.next_token_address();
        let registry = TokenRegistry::new(
            address,
            request.owner,
            request.name.clone(),
            request.symbol.clone(),
            request.decimals,
            request.initial_supply,
        )?;

        Ok(StagedCreation {
            index: self.nonce(),
            registry,
            events: vec![PendingEvent {
                emitter: self.address,
                kind: EventKind::NewToken { token: address },
            }],
        })
    }

    /// Record a committed token
    pub(crate) fn record_created(&mut self, token: AccountId) {
        self.tokens.push(token);
    }
}

/// Address of the token created by `factory` with nonce `nonce`
pub fn token_address(factory: &AccountId, nonce: u64) -> AccountId {
    let mut seed = Vec::with_capacity(factory.as_bytes().len() + 8);
    seed.extend_from_slice(factory.as_bytes());
    seed.extend_from_slice(&nonce.to_be_bytes());
    AccountId::derive(&seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_prepare_does_not_advance_nonce() {
        let factory = TokenFactory::new(AccountId::derive(b"factory"));
        let request = CreateToken::new(AccountId::random(), "Asset Token", "CLR", 18, 1000);

        let first = factory.prepare(&request).unwrap();
        let second = factory.prepare(&request).unwrap();
        assert_eq!(first.registry.address(), second.registry.address());
        assert_eq!(factory.nonce(), 0);
    }

    #[test]
    fn test_addresses_are_distinct_per_nonce() {
        let mut factory = TokenFactory::new(AccountId::derive(b"factory"));
        let first = factory.next_token_address();
        factory.record_created(first);
        let second = factory.next_token_address();

        assert_ne!(first, second);
        assert_eq!(factory.tokens(), &[first]);
        assert_eq!(second, token_address(&factory.address(), 1));
    }

    #[test]
    fn test_new_token_event() {
        let factory = TokenFactory::new(AccountId::derive(b"factory"));
        let staged = factory
            .prepare(&CreateToken::new(AccountId::random(), "Asset Token", "CLR", 18, 1000))
            .unwrap();

        assert_eq!(staged.events.len(), 1);
        assert_eq!(staged.events[0].emitter, factory.address());
        assert_eq!(
            staged.events[0].kind,
            EventKind::NewToken {
                token: staged.registry.address()
            }
        );
    }

    #[test]
    fn test_overflowing_supply_rejected() {
        let factory = TokenFactory::new(AccountId::derive(b"factory"));
        let request = CreateToken::new(AccountId::random(), "Huge", "HUGE", 77, 1);
        assert!(matches!(
            factory.prepare(&request),
            Err(Error::SupplyOverflow { decimals: 77, .. })
        ));
    }
}
