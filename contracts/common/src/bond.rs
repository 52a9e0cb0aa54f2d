//! Bond Primitive
//!
//! A bond takes deposits of one collateral token and mints tranche tokens
//! in fixed ratios. Before maturity a holder can redeem a matching set of
//! tranches for collateral; at maturity the collateral is split by
//! seniority and each tranche redeems against its own slice.
//!
//! Custody: the bond holds collateral at the address equal to its id. Once
//! mature, each tranche's slice sits at the address equal to the tranche
//! token id.

use crate::constants::tranches::{BOND_FEE_BPS_DENOMINATOR, TRANCHE_RATIO_GRANULARITY};
use crate::errors::{TrancheError, TrancheResult};
use crate::math::{mul_div, safe_add};
use crate::tokens::TokenLedger;
use crate::types::{Address, BondId, TokenId, Tranche, TrancheData};
use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Bond {
    pub id: BondId,
    pub owner: Address,
    pub collateral_token: TokenId,
    pub tranches: Vec<Tranche>,
    pub creation_date: u64,
    pub maturity_date: u64,
    pub deposit_fee_bps: u64,
    pub is_mature: bool,
}

impl Bond {
    /// Creates a bond, deriving one tranche token per ratio.
    pub fn new(
        id: BondId,
        owner: Address,
        collateral_token: TokenId,
        ratios: &[u64],
        creation_date: u64,
        maturity_date: u64,
        deposit_fee_bps: u64,
    ) -> TrancheResult<Self> {
        if ratios.is_empty() || ratios.iter().sum::<u64>() != TRANCHE_RATIO_GRANULARITY {
            return Err(TrancheError::InvalidTrancheRatios);
        }
        if ratios.iter().any(|r| *r == 0) {
            return Err(TrancheError::InvalidTrancheRatios);
        }
        if maturity_date <= creation_date {
            return Err(TrancheError::InvalidInput { param: "maturity_date", reason: "must follow creation" });
        }
        if deposit_fee_bps >= BOND_FEE_BPS_DENOMINATOR {
            return Err(TrancheError::InvalidInput { param: "deposit_fee_bps", reason: "must be below 100%" });
        }

        let tranches = ratios
            .iter()
            .enumerate()
            .map(|(index, ratio)| Tranche { token: tranche_token_id(&id, index), ratio: *ratio })
            .collect();

        Ok(Self {
            id,
            owner,
            collateral_token,
            tranches,
            creation_date,
            maturity_date,
            deposit_fee_bps,
            is_mature: false,
        })
    }

    pub fn tranche_count(&self) -> usize {
        self.tranches.len()
    }

    pub fn tranche_data(&self) -> TrancheData {
        TrancheData { tranches: self.tranches.clone() }
    }

    /// Collateral held by the bond before maturity
    pub fn collateral_balance(&self, tokens: &TokenLedger) -> u64 {
        tokens.balance_of(&self.collateral_token, &self.id)
    }

    /// Sum of all tranche supplies
    pub fn total_debt(&self, tokens: &TokenLedger) -> TrancheResult<u64> {
        self.tranches
            .iter()
            .try_fold(0u64, |acc, t| safe_add(acc, tokens.total_supply(&t.token)))
    }

    /// Returns true once the maturity date has passed, mature or not
    pub fn is_past_maturity(&self, now: u64) -> bool {
        now >= self.maturity_date
    }

    /// Tranche amounts a deposit of `amount` collateral mints, before fees
    pub fn deposit_values(&self, tokens: &TokenLedger, amount: u64) -> TrancheResult<Vec<u64>> {
        let collateral = self.collateral_balance(tokens);
        let debt = self.total_debt(tokens)?;
        self.tranches
            .iter()
            .map(|t| {
                let value = mul_div(amount, t.ratio, TRANCHE_RATIO_GRANULARITY)?;
                if collateral > 0 {
                    mul_div(value, debt, collateral)
                } else {
                    Ok(value)
                }
            })
            .collect()
    }

    /// Deposit fee charged on a tranche amount
    pub fn deposit_fee(&self, value: u64) -> TrancheResult<u64> {
        mul_div(value, self.deposit_fee_bps, BOND_FEE_BPS_DENOMINATOR)
    }

    /// Deposits collateral and mints tranches. Returns the amounts credited
    /// to the depositor after the deposit fee.
    pub fn deposit(&mut self, tokens: &mut TokenLedger, now: u64, depositor: &Address, amount: u64) -> TrancheResult<Vec<u64>> {
        if self.is_mature || self.is_past_maturity(now) {
            return Err(TrancheError::BondMature { bond: self.id });
        }
        if amount == 0 {
            return Err(TrancheError::ZeroAmount);
        }

        let values = self.deposit_values(tokens, amount)?;
        tokens.transfer(&self.collateral_token, depositor, &self.id, amount)?;

        let mut minted = Vec::with_capacity(values.len());
        for (tranche, value) in self.tranches.iter().zip(values) {
            let fee = self.deposit_fee(value)?;
            let net = value - fee;
            tokens.mint(&tranche.token, depositor, net)?;
            tokens.mint(&tranche.token, &self.owner, fee)?;
            minted.push(net);
        }
        Ok(minted)
    }

    /// Redeems a set of tranches in exact bond proportions for collateral
    pub fn redeem(&mut self, tokens: &mut TokenLedger, holder: &Address, amounts: &[u64]) -> TrancheResult<u64> {
        if self.is_mature {
            return Err(TrancheError::BondMature { bond: self.id });
        }
        if amounts.len() != self.tranches.len() {
            return Err(TrancheError::InvalidRedemptionRatio);
        }
        let total = amounts.iter().try_fold(0u64, |acc, a| safe_add(acc, *a))?;
        if total == 0 {
            return Err(TrancheError::ZeroAmount);
        }
        for (tranche, amount) in self.tranches.iter().zip(amounts) {
            if mul_div(*amount, TRANCHE_RATIO_GRANULARITY, total)? != tranche.ratio {
                return Err(TrancheError::InvalidRedemptionRatio);
            }
        }

        let collateral_out = mul_div(total, self.collateral_balance(tokens), self.total_debt(tokens)?)?;
        for (tranche, amount) in self.tranches.iter().zip(amounts) {
            tokens.burn(&tranche.token, holder, *amount)?;
        }
        tokens.transfer(&self.collateral_token, &self.id, holder, collateral_out)?;
        Ok(collateral_out)
    }

    /// Splits the collateral across tranche custody by seniority
    pub fn mature(&mut self, tokens: &mut TokenLedger, now: u64) -> TrancheResult<()> {
        if self.is_mature {
            return Err(TrancheError::BondMature { bond: self.id });
        }
        if !self.is_past_maturity(now) {
            return Err(TrancheError::BondNotMature { bond: self.id });
        }

        let mut remaining = self.collateral_balance(tokens);
        let last = self.tranches.len() - 1;
        for (index, tranche) in self.tranches.iter().enumerate() {
            let share = if index == last {
                remaining
            } else {
                remaining.min(tokens.total_supply(&tranche.token))
            };
            tokens.transfer(&self.collateral_token, &self.id, &tranche.token, share)?;
            remaining -= share;
        }
        self.is_mature = true;
        Ok(())
    }

    /// Redeems a matured tranche for its share of that tranche's collateral
    pub fn redeem_mature(&mut self, tokens: &mut TokenLedger, holder: &Address, tranche: &TokenId, amount: u64) -> TrancheResult<u64> {
        if !self.is_mature {
            return Err(TrancheError::BondNotMature { bond: self.id });
        }
        if !self.tranches.iter().any(|t| t.token == *tranche) {
            return Err(TrancheError::UnknownTranche { token: *tranche });
        }
        let supply = tokens.total_supply(tranche);
        let custody = tokens.balance_of(&self.collateral_token, tranche);
        let collateral_out = mul_div(custody, amount, supply)?;

        tokens.burn(tranche, holder, amount)?;
        tokens.transfer(&self.collateral_token, tranche, holder, collateral_out)?;
        Ok(collateral_out)
    }
}

/// Deterministic bond id
pub fn generate_bond_id(collateral_token: &TokenId, maturity_date: u64, nonce: u64) -> BondId {
    let mut hasher = Sha256::new();
    hasher.update(b"bond");
    hasher.update(collateral_token);
    hasher.update(maturity_date.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    let result = hasher.finalize();
    let mut id = [0u8; 32];
    id.copy_from_slice(&result);
    id
}

/// Deterministic tranche token id for the `index`-th tranche of a bond
pub fn tranche_token_id(bond: &BondId, index: usize) -> TokenId {
    let mut hasher = Sha256::new();
    hasher.update(b"tranche");
    hasher.update(bond);
    hasher.update((index as u64).to_le_bytes());
    let result = hasher.finalize();
    let mut id = [0u8; 32];
    id.copy_from_slice(&result);
    id
}
