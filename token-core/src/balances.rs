//! Balance store
//!
//! Maps accounts to raw balances. Unseen accounts read as zero; there is
//! no explicit account creation. Mutations go through [`StagedBalances`],
//! an overlay that is either turned into a list of writes or dropped.

use crate::types::{AccountId, Amount};
use crate::{Error, Result};
use std::collections::HashMap;

/// Balances of a single token
#[derive(Debug, Clone, Default)]
pub struct BalanceStore {
    balances: HashMap<AccountId, Amount>,
}

impl BalanceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of an account (zero if never credited)
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Sum of all balances
    pub fn total(&self) -> Result<Amount> {
        self.balances
            .values()
            .try_fold(0u128, |acc, balance| acc.checked_add(*balance))
            .ok_or(Error::Overflow)
    }

    /// Number of accounts holding a non-zero balance
    pub fn holders(&self) -> usize {
        self.balances.values().filter(|b| **b > 0).count()
    }

    /// Iterate over every account ever written
    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &Amount)> {
        self.balances.iter()
    }

    /// Open an overlay for staged mutations
    pub fn stage(&self) -> StagedBalances<'_> {
        StagedBalances {
            base: self,
            writes: Vec::new(),
        }
    }

    /// Overwrite a balance (used when applying a commit or recovering)
    pub(crate) fn set(&mut self, account: AccountId, amount: Amount) {
        self.balances.insert(account, amount);
    }
}

/// Uncommitted view over a [`BalanceStore`]
///
/// Reads see staged writes first. Nothing reaches the underlying store
/// until the writes are applied by the owner of the store.
#[derive(Debug)]
pub struct StagedBalances<'a> {
    base: &'a BalanceStore,
    writes: Vec<(AccountId, Amount)>,
}

impl StagedBalances<'_> {
    /// Balance including staged writes
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.writes
            .iter()
            .find(|(a, _)| a == account)
            .map(|(_, amount)| *amount)
            .unwrap_or_else(|| self.base.balance_of(account))
    }

    /// Subtract `value` from `account`
    pub fn debit(&mut self, account: AccountId, value: Amount) -> Result<()> {
        let have = self.balance_of(&account);
        let new_balance = have.checked_sub(value).ok_or(Error::InsufficientBalance {
            have,
            need: value,
        })?;
        self.write(account, new_balance);
        Ok(())
    }

    /// Add `value` to `account`
    pub fn credit(&mut self, account: AccountId, value: Amount) -> Result<()> {
        let new_balance = self
            .balance_of(&account)
            .checked_add(value)
            .ok_or(Error::Overflow)?;
        self.write(account, new_balance);
        Ok(())
    }

    /// Final balances of every touched account, in first-touch order
    pub fn into_writes(self) -> Vec<(AccountId, Amount)> {
        self.writes
    }

    fn write(&mut self, account: AccountId, amount: Amount) {
        match self.writes.iter_mut().find(|(a, _)| *a == account) {
            Some(entry) => entry.1 = amount,
            None => self.writes.push((account, amount)),
        }
    }
}
