//! BondView
//!
//! Read-only adapter over a [`Bond`] and the token balances backing it.
//! The perp and the vault only ever reason about bonds through this view.

use crate::bond::Bond;
use crate::constants::tranches::{
    BOND_FEE_BPS_DENOMINATOR, JUNIOR_INDEX, REQUIRED_TRANCHE_COUNT, SENIOR_INDEX, TRANCHE_RATIO_GRANULARITY,
};
use crate::errors::{TrancheError, TrancheResult};
use crate::math::{mul_div, mul_div_up};
use crate::tokens::TokenLedger;
use crate::types::{Address, BondId, TokenAmount, TokenId, Tranche, TrancheData};
use crate::Vec;

/// Collateral backing a tranche and the tranche's outstanding supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collateralization {
    pub collateral: u64,
    pub debt: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BondView<'a> {
    bond: &'a Bond,
    tokens: &'a TokenLedger,
    now: u64,
}

impl<'a> BondView<'a> {
    pub fn new(bond: &'a Bond, tokens: &'a TokenLedger, now: u64) -> Self {
        Self { bond, tokens, now }
    }

    pub fn id(&self) -> BondId {
        self.bond.id
    }

    pub fn bond(&self) -> &'a Bond {
        self.bond
    }

    pub fn collateral_token(&self) -> TokenId {
        self.bond.collateral_token
    }

    pub fn maturity_date(&self) -> u64 {
        self.bond.maturity_date
    }

    /// Seconds left until maturity, zero once reached
    pub fn time_to_maturity(&self) -> u64 {
        self.bond.maturity_date.saturating_sub(self.now)
    }

    /// Total lifetime of the bond in seconds
    pub fn duration(&self) -> u64 {
        self.bond.maturity_date.saturating_sub(self.bond.creation_date)
    }

    pub fn is_mature(&self) -> bool {
        self.bond.is_mature
    }

    pub fn is_past_maturity(&self) -> bool {
        self.bond.is_past_maturity(self.now)
    }

    pub fn collateral_balance(&self) -> u64 {
        self.bond.collateral_balance(self.tokens)
    }

    pub fn total_debt(&self) -> TrancheResult<u64> {
        self.bond.total_debt(self.tokens)
    }

    /// Tranche tokens and ratios, seniors first
    pub fn tranche_data(&self) -> TrancheData {
        self.bond.tranche_data()
    }

    /// Tranche data of a bond the perp and vault can work with
    pub fn two_tranche_data(&self) -> TrancheResult<TrancheData> {
        let count = self.bond.tranche_count();
        if count != REQUIRED_TRANCHE_COUNT {
            return Err(TrancheError::UnsupportedTrancheCount { count });
        }
        Ok(self.tranche_data())
    }

    pub fn senior(&self) -> TrancheResult<Tranche> {
        Ok(self.two_tranche_data()?.tranches[SENIOR_INDEX])
    }

    pub fn junior(&self) -> TrancheResult<Tranche> {
        Ok(self.two_tranche_data()?.tranches[JUNIOR_INDEX])
    }

    /// Tranche amounts a depositor would receive for `amount` collateral
    pub fn preview_deposit(&self, amount: u64) -> TrancheResult<Vec<TokenAmount>> {
        let values = self.bond.deposit_values(self.tokens, amount)?;
        self.bond
            .tranches
            .iter()
            .zip(values)
            .map(|(t, value)| {
                let fee = self.bond.deposit_fee(value)?;
                Ok(TokenAmount::new(t.token, value - fee))
            })
            .collect()
    }

    /// Collateral needed so that a deposit credits at least `desired` of the
    /// `index`-th tranche
    pub fn estimate_deposit_for_tranche(&self, index: usize, desired: u64) -> TrancheResult<u64> {
        let tranche = self
            .bond
            .tranches
            .get(index)
            .ok_or(TrancheError::InvalidInput { param: "index", reason: "no such tranche" })?;
        if desired == 0 {
            return Ok(0);
        }

        let keep = BOND_FEE_BPS_DENOMINATOR - self.bond.deposit_fee_bps;
        let mut value = mul_div_up(desired, BOND_FEE_BPS_DENOMINATOR, keep)?;
        // The fee rounds down, so a slightly smaller gross amount may still net `desired`
        while value > desired && value - 1 - self.bond.deposit_fee(value - 1)? >= desired {
            value -= 1;
        }

        let collateral = self.collateral_balance();
        if collateral > 0 {
            let debt = self.total_debt()?;
            if debt == 0 {
                return Err(TrancheError::DivisionByZero);
            }
            value = mul_div_up(value, collateral, debt)?;
        }
        mul_div_up(value, TRANCHE_RATIO_GRANULARITY, tranche.ratio)
    }

    /// Largest pair in exact bond proportions covered by `balances`.
    ///
    /// Rounds down, so leftovers smaller than one ratio unit are never
    /// redeemable through this path.
    pub fn compute_redeemable_amounts(&self, balances: &[u64]) -> TrancheResult<Vec<u64>> {
        let data = self.two_tranche_data()?;
        if balances.len() != data.count() {
            return Err(TrancheError::InvalidInput { param: "balances", reason: "one balance per tranche" });
        }

        let units = data
            .tranches
            .iter()
            .zip(balances)
            .map(|(t, balance)| balance / t.ratio)
            .min()
            .unwrap_or(0);

        data.tranches
            .iter()
            .map(|t| units.checked_mul(t.ratio).ok_or(TrancheError::Overflow))
            .collect()
    }

    /// Redeemable amounts for everything `holder` owns of this bond
    pub fn compute_redeemable_amounts_of(&self, holder: &Address) -> TrancheResult<Vec<u64>> {
        let balances: Vec<u64> = self
            .bond
            .tranches
            .iter()
            .map(|t| self.tokens.balance_of(&t.token, holder))
            .collect();
        self.compute_redeemable_amounts(&balances)
    }

    /// Collateral claim and supply of each tranche.
    ///
    /// Before maturity the collateral is split by the seniority waterfall;
    /// after maturity each tranche's custody balance is used.
    pub fn tranche_collateralizations(&self) -> TrancheResult<Vec<Collateralization>> {
        let mut result = Vec::with_capacity(self.bond.tranche_count());
        if self.bond.is_mature {
            for t in self.bond.tranches.iter() {
                result.push(Collateralization {
                    collateral: self.tokens.balance_of(&self.bond.collateral_token, &t.token),
                    debt: self.tokens.total_supply(&t.token),
                });
            }
            return Ok(result);
        }

        let mut remaining = self.collateral_balance();
        let last = self.bond.tranche_count().saturating_sub(1);
        for (index, t) in self.bond.tranches.iter().enumerate() {
            let debt = self.tokens.total_supply(&t.token);
            let collateral = if index == last { remaining } else { remaining.min(debt) };
            remaining -= collateral;
            result.push(Collateralization { collateral, debt });
        }
        Ok(result)
    }

    /// Underlying value of `amount` units of `tranche`
    pub fn tranche_value(&self, tranche: &TokenId, amount: u64) -> TrancheResult<u64> {
        let index = self
            .bond
            .tranches
            .iter()
            .position(|t| t.token == *tranche)
            .ok_or(TrancheError::UnknownTranche { token: *tranche })?;
        let c = self.tranche_collateralizations()?[index];
        if c.debt == 0 {
            return Ok(0);
        }
        mul_div(c.collateral, amount, c.debt)
    }
}
