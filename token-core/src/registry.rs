//! Token metadata
//!
//! A [`TokenRegistry`] is fixed at creation and never modified afterwards.
//! `decimals` only affects presentation; stored balances are raw integers.

use crate::types::{AccountId, Amount};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable metadata of one token instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegistry {
    address: AccountId,
    owner: AccountId,
    name: String,
    symbol: String,
    decimals: u8,
    total_supply: Amount,
}

impl TokenRegistry {
    /// Build metadata, scaling `initial_supply` by `10^decimals`
    pub fn new(
        address: AccountId,
        owner: AccountId,
        name: impl Into<String>,
        symbol: impl Into<String>,
        decimals: u8,
        initial_supply: Amount,
    ) -> Result<Self> {
        let total_supply = scale_supply(initial_supply, decimals)?;

        Ok(Self {
            address,
            owner,
            name: name.into(),
            symbol: symbol.into(),
            decimals,
            total_supply,
        })
    }

    /// Token address
    pub fn address(&self) -> AccountId {
        self.address
    }

    /// Account credited with the initial supply
    pub fn owner(&self) -> AccountId {
        self.owner
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticker symbol
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Display precision
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Scaled total supply (raw units)
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Convert a raw amount into whole units for display
    ///
    /// `rust_decimal` supports at most 28 fractional digits and 96-bit
    /// mantissas; anything larger is reported as [`Error::DisplayRange`].
    pub fn display_amount(&self, raw: Amount) -> Result<Decimal> {
        let mantissa = i128::try_from(raw)
            .map_err(|_| Error::DisplayRange(format!("{} exceeds i128", raw)))?;

        Decimal::try_from_i128_with_scale(mantissa, u32::from(self.decimals))
            .map_err(|e| Error::DisplayRange(format!("{} at scale {}: {}", raw, self.decimals, e)))
    }
}

/// Scale a whole-unit supply by `10^decimals` with overflow checking
pub fn scale_supply(supply: Amount, decimals: u8) -> Result<Amount> {
    let overflow = || Error::SupplyOverflow { supply, decimals };

    let unit = 10u128.checked_pow(u32::from(decimals)).ok_or_else(overflow)?;
    supply.checked_mul(unit).ok_or_else(overflow)
}
