//! Pricing and Yield Strategies
//!
//! The set of strategies is closed. Each one declares the decimals it
//! reports in, and the perp refuses to wire a strategy whose decimals do
//! not match its own price/yield precision.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tranche_common::{
    constants::pricing::{PRICE_DECIMALS, YIELD_DECIMALS},
    errors::{TrancheError, TrancheResult},
    math::mul_div,
    types::TokenId,
    BTreeMap, BondView,
};

/// Tranche class identifier: same collateral, same ratios, same seniority
pub type TrancheClass = [u8; 32];

/// Computes the class of the `index`-th tranche of a bond
pub fn tranche_class(collateral_token: &TokenId, ratios: &[u64], index: usize) -> TrancheClass {
    let mut hasher = Sha256::new();
    hasher.update(collateral_token);
    for ratio in ratios {
        hasher.update(ratio.to_le_bytes());
    }
    hasher.update((index as u64).to_le_bytes());
    let result = hasher.finalize();
    let mut class = [0u8; 32];
    class.copy_from_slice(&result);
    class
}

fn unit(decimals: u8) -> TrancheResult<u64> {
    10u64.checked_pow(decimals as u32).ok_or(TrancheError::Overflow)
}

// ============ Pricing ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum PricingStrategy {
    /// Every reserve token is worth one unit
    Unit { decimals: u8 },
    /// Tranches are priced at their collateral claim per unit; the mature
    /// balance at collateral per standardized unit
    CollateralRatio { decimals: u8 },
}

impl Default for PricingStrategy {
    fn default() -> Self {
        Self::Unit { decimals: PRICE_DECIMALS }
    }
}

impl PricingStrategy {
    pub fn decimals(&self) -> u8 {
        match self {
            Self::Unit { decimals } | Self::CollateralRatio { decimals } => *decimals,
        }
    }

    /// Fails unless the strategy reports prices with `PRICE_DECIMALS`
    pub fn validate(&self) -> TrancheResult<()> {
        if self.decimals() != PRICE_DECIMALS {
            return Err(TrancheError::InvalidStrategyDecimals { expected: PRICE_DECIMALS, actual: self.decimals() });
        }
        Ok(())
    }

    /// Price of one unit of a live tranche
    pub fn compute_tranche_price(&self, view: &BondView<'_>, tranche: &TokenId) -> TrancheResult<u64> {
        match self {
            Self::Unit { decimals } => unit(*decimals),
            Self::CollateralRatio { decimals } => {
                let index = view
                    .tranche_data()
                    .index_of(tranche)
                    .ok_or(TrancheError::UnknownTranche { token: *tranche })?;
                let c = view.tranche_collateralizations()?[index];
                if c.debt == 0 {
                    return unit(*decimals);
                }
                mul_div(c.collateral, unit(*decimals)?, c.debt)
            }
        }
    }

    /// Price of one standardized unit of the mature balance
    pub fn compute_mature_tranche_price(&self, mature_balance: u64, std_mature_balance: u64) -> TrancheResult<u64> {
        match self {
            Self::Unit { decimals } => unit(*decimals),
            Self::CollateralRatio { decimals } => {
                if std_mature_balance == 0 {
                    return unit(*decimals);
                }
                mul_div(mature_balance, unit(*decimals)?, std_mature_balance)
            }
        }
    }
}

// ============ Yield ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum YieldStrategy {
    /// Every tranche counts in full
    Unit { decimals: u8 },
    /// Per-class yield factor; unlisted classes count as zero
    TrancheClassDiscount {
        decimals: u8,
        discounts: BTreeMap<TrancheClass, u64>,
    },
}

impl Default for YieldStrategy {
    fn default() -> Self {
        Self::Unit { decimals: YIELD_DECIMALS }
    }
}

impl YieldStrategy {
    pub fn decimals(&self) -> u8 {
        match self {
            Self::Unit { decimals } | Self::TrancheClassDiscount { decimals, .. } => *decimals,
        }
    }

    /// Fails unless the strategy reports yields with `YIELD_DECIMALS`
    pub fn validate(&self) -> TrancheResult<()> {
        if self.decimals() != YIELD_DECIMALS {
            return Err(TrancheError::InvalidStrategyDecimals { expected: YIELD_DECIMALS, actual: self.decimals() });
        }
        Ok(())
    }

    /// Yield factor applied to a tranche entering the reserve
    pub fn compute_yield(&self, view: &BondView<'_>, tranche: &TokenId) -> TrancheResult<u64> {
        match self {
            Self::Unit { decimals } => unit(*decimals),
            Self::TrancheClassDiscount { discounts, .. } => {
                let data = view.tranche_data();
                let index = data.index_of(tranche).ok_or(TrancheError::UnknownTranche { token: *tranche })?;
                let class = tranche_class(&view.collateral_token(), &data.ratios(), index);
                Ok(discounts.get(&class).copied().unwrap_or(0))
            }
        }
    }

    /// Sets the discount of a tranche class. Only the discount strategy
    /// carries per-class data.
    pub fn set_discount(&mut self, class: TrancheClass, value: u64) -> TrancheResult<()> {
        match self {
            Self::Unit { .. } => Err(TrancheError::InvalidInput { param: "yield_strategy", reason: "no per-class discounts" }),
            Self::TrancheClassDiscount { decimals, discounts } => {
                if value > unit(*decimals)? {
                    return Err(TrancheError::InvalidPerc { param: "discount", value });
                }
                if value == 0 {
                    discounts.remove(&class);
                } else {
                    discounts.insert(class, value);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tranche_common::{
        bond::generate_bond_id,
        constants::pricing::{UNIT_PRICE, UNIT_YIELD},
        Bond, TokenLedger,
    };

    const COLLATERAL: TokenId = [0xCC; 32];
    const ALICE: [u8; 32] = [1u8; 32];

    fn bond() -> (Bond, TokenLedger) {
        let id = generate_bond_id(&COLLATERAL, 1_000, 0);
        let mut bond = Bond::new(id, [0xAA; 32], COLLATERAL, &[200, 800], 0, 1_000, 0).unwrap();
        let mut tokens = TokenLedger::new();
        tokens.mint(&COLLATERAL, &ALICE, 1_000).unwrap();
        bond.deposit(&mut tokens, 1, &ALICE, 1_000).unwrap();
        (bond, tokens)
    }

    #[test]
    fn test_strategy_decimals_validation() {
        assert!(PricingStrategy::default().validate().is_ok());
        assert_eq!(
            PricingStrategy::CollateralRatio { decimals: 18 }.validate(),
            Err(TrancheError::InvalidStrategyDecimals { expected: PRICE_DECIMALS, actual: 18 })
        );
        assert!(YieldStrategy::default().validate().is_ok());
        assert!(YieldStrategy::TrancheClassDiscount { decimals: 6, discounts: BTreeMap::new() }
            .validate()
            .is_err());
    }

    #[test]
    fn test_collateral_ratio_pricing() {
        let (bond, mut tokens) = bond();
        tokens.rebase(&COLLATERAL, 1, 10).unwrap();
        let view = BondView::new(&bond, &tokens, 1);
        let pricing = PricingStrategy::CollateralRatio { decimals: PRICE_DECIMALS };

        // 100 collateral against 200 senior debt
        assert_eq!(pricing.compute_tranche_price(&view, &bond.tranches[0].token).unwrap(), UNIT_PRICE / 2);
        assert_eq!(pricing.compute_tranche_price(&view, &bond.tranches[1].token).unwrap(), 0);
        assert_eq!(pricing.compute_mature_tranche_price(150, 100).unwrap(), UNIT_PRICE * 3 / 2);
        assert_eq!(pricing.compute_mature_tranche_price(150, 0).unwrap(), UNIT_PRICE);
    }

    #[test]
    fn test_class_discount_yield() {
        let (bond, tokens) = bond();
        let view = BondView::new(&bond, &tokens, 1);
        let mut strategy = YieldStrategy::TrancheClassDiscount { decimals: YIELD_DECIMALS, discounts: BTreeMap::new() };

        let senior = bond.tranches[0].token;
        let junior = bond.tranches[1].token;
        let senior_class = tranche_class(&COLLATERAL, &[200, 800], 0);
        strategy.set_discount(senior_class, UNIT_YIELD).unwrap();

        assert_eq!(strategy.compute_yield(&view, &senior).unwrap(), UNIT_YIELD);
        assert_eq!(strategy.compute_yield(&view, &junior).unwrap(), 0);
        assert!(strategy.set_discount(senior_class, UNIT_YIELD + 1).is_err());
        assert!(YieldStrategy::default().set_discount(senior_class, 1).is_err());
    }

    #[test]
    fn test_tranche_class_ignores_bond_identity() {
        let a = tranche_class(&COLLATERAL, &[200, 800], 0);
        assert_eq!(a, tranche_class(&COLLATERAL, &[200, 800], 0));
        assert_ne!(a, tranche_class(&COLLATERAL, &[200, 800], 1));
        assert_ne!(a, tranche_class(&COLLATERAL, &[250, 750], 0));
    }
}
