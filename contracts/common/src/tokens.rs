//! In-memory Fungible Token Ledger
//!
//! Balances for every token on the chain, keyed by token id then holder.
//! Rebasing tokens are modelled with [`TokenLedger::rebase`], which scales
//! every holder at once without any transfer taking place.

use crate::errors::{TrancheError, TrancheResult};
use crate::types::{Address, TokenId};
use crate::validation::require_sufficient_balance;
use crate::BTreeMap;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct TokenLedger {
    balances: BTreeMap<TokenId, BTreeMap<Address, u64>>,
    supplies: BTreeMap<TokenId, u64>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, token: &TokenId, holder: &Address) -> u64 {
        self.balances
            .get(token)
            .and_then(|holders| holders.get(holder))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_supply(&self, token: &TokenId) -> u64 {
        self.supplies.get(token).copied().unwrap_or(0)
    }

    pub fn mint(&mut self, token: &TokenId, to: &Address, amount: u64) -> TrancheResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let supply = self.supplies.entry(*token).or_insert(0);
        *supply = supply.checked_add(amount).ok_or(TrancheError::Overflow)?;
        let balance = self.balances.entry(*token).or_default().entry(*to).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(TrancheError::Overflow)?;
        Ok(())
    }

    pub fn burn(&mut self, token: &TokenId, from: &Address, amount: u64) -> TrancheResult<()> {
        if amount == 0 {
            return Ok(());
        }
        self.debit(token, from, amount)?;
        let supply = self.supplies.entry(*token).or_insert(0);
        *supply = supply.checked_sub(amount).ok_or(TrancheError::Underflow)?;
        Ok(())
    }

    pub fn transfer(&mut self, token: &TokenId, from: &Address, to: &Address, amount: u64) -> TrancheResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        self.debit(token, from, amount)?;
        let balance = self.balances.entry(*token).or_default().entry(*to).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(TrancheError::Overflow)?;
        Ok(())
    }

    /// Scales every balance of `token` by `numerator / denominator`.
    ///
    /// Balances round down individually and the supply is recomputed as
    /// their sum.
    pub fn rebase(&mut self, token: &TokenId, numerator: u64, denominator: u64) -> TrancheResult<()> {
        if denominator == 0 {
            return Err(TrancheError::DivisionByZero);
        }
        let mut supply: u64 = 0;
        if let Some(holders) = self.balances.get_mut(token) {
            for balance in holders.values_mut() {
                let scaled = (*balance as u128) * (numerator as u128) / (denominator as u128);
                *balance = u64::try_from(scaled).map_err(|_| TrancheError::Overflow)?;
                supply = supply.checked_add(*balance).ok_or(TrancheError::Overflow)?;
            }
        }
        self.supplies.insert(*token, supply);
        Ok(())
    }

    fn debit(&mut self, token: &TokenId, from: &Address, amount: u64) -> TrancheResult<()> {
        require_sufficient_balance(self.balance_of(token, from), amount)?;
        if let Some(balance) = self.balances.get_mut(token).and_then(|h| h.get_mut(from)) {
            *balance -= amount;
        }
        Ok(())
    }
}
