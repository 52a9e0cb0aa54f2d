//! Fee Policy
//!
//! Keeps the perp and the vault in balance. Everything here is a pure
//! function of the stored parameters and a [`SubscriptionState`] snapshot
//! supplied by the caller:
//!
//! - the **deviation ratio** (`dr`), actual over target subscription ratio,
//!   where `ONE` means balanced,
//! - flat mint/burn fees for perps and vault notes,
//! - swap fees between underlying and perps, averaged over the `dr`
//!   interval a swap moves through,
//! - the sigmoid rollover fee,
//! - the signed daily rebalance flow between the two pools.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use tranche_common::{
    constants::{
        fees::*,
        fixed_point::{ONE, ONE_I128},
        sigmoid::{DEFAULT_ROLLOVER_FEE_GROWTH, DEFAULT_ROLLOVER_FEE_LOWER, DEFAULT_ROLLOVER_FEE_UPPER, MAX_ASYMPTOTE},
        tranches::TRANCHE_RATIO_GRANULARITY,
    },
    errors::{TrancheError, TrancheResult},
    events::ConfigParam,
    line::compute_piecewise_avg_y,
    math::{clamp_i128, clip_div_u128, mul_div, mul_div_u128, mul_div_up, Rounding},
    types::{Address, Line, RebalanceData, Range, SigmoidParams, SubscriptionState},
    validation::{require_owner, require_perc, require_perc_range, require_valid_address},
};

// ============ Parameters ============

/// Every tunable of the fee policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FeePolicyParams {
    /// Vault-to-perp subscription the system aims for
    pub target_subscription_ratio: u64,
    /// Swaps are disabled once `dr` leaves this bound
    pub dr_hard_bound: Range,
    /// Swaps cost the minimum flash fee inside this bound
    pub dr_soft_bound: Range,
    /// Rebalancing is a no-op while `dr` is inside this band
    pub rebal_eq_dr: Range,
    pub perp_mint_fee_perc: u64,
    pub perp_burn_fee_perc: u64,
    pub vault_mint_fee_perc: u64,
    pub vault_burn_fee_perc: u64,
    /// Underlying-to-perp swap fee: `lower` inside the soft bound, `upper` at the hard bound
    pub flash_mint_fee_percs: Range,
    /// Perp-to-underlying swap fee: `lower` inside the soft bound, `upper` at the hard bound
    pub flash_redeem_fee_percs: Range,
    /// Daily cap on value moved out of the perp, as a share of total TVL
    pub debasement_system_tvl_perc: u64,
    /// Daily cap on value moved into the perp, as a share of total TVL
    pub enrichment_system_tvl_perc: u64,
    pub debasement_protocol_share_perc: u64,
    pub enrichment_protocol_share_perc: u64,
    /// Rollover fee curve over `dr`
    pub rollover_fee: SigmoidParams,
}

impl Default for FeePolicyParams {
    fn default() -> Self {
        Self {
            target_subscription_ratio: DEFAULT_TARGET_SUBSCRIPTION_RATIO,
            dr_hard_bound: Range::new(DEFAULT_DR_HARD_LOWER, DEFAULT_DR_HARD_UPPER),
            dr_soft_bound: Range::new(DEFAULT_DR_SOFT_LOWER, DEFAULT_DR_SOFT_UPPER),
            rebal_eq_dr: Range::new(DEFAULT_REBAL_EQ_LOWER, DEFAULT_REBAL_EQ_UPPER),
            perp_mint_fee_perc: 0,
            perp_burn_fee_perc: 0,
            vault_mint_fee_perc: 0,
            vault_burn_fee_perc: 0,
            flash_mint_fee_percs: Range::new(DEFAULT_FLASH_FEE_LOWER, DEFAULT_FLASH_FEE_UPPER),
            flash_redeem_fee_percs: Range::new(DEFAULT_FLASH_FEE_LOWER, DEFAULT_FLASH_FEE_UPPER),
            debasement_system_tvl_perc: DEFAULT_DEBASEMENT_SYSTEM_TVL_PERC,
            enrichment_system_tvl_perc: DEFAULT_ENRICHMENT_SYSTEM_TVL_PERC,
            debasement_protocol_share_perc: DEFAULT_PROTOCOL_SHARE_PERC,
            enrichment_protocol_share_perc: DEFAULT_PROTOCOL_SHARE_PERC,
            rollover_fee: SigmoidParams {
                lower: DEFAULT_ROLLOVER_FEE_LOWER,
                upper: DEFAULT_ROLLOVER_FEE_UPPER,
                growth: DEFAULT_ROLLOVER_FEE_GROWTH,
            },
        }
    }
}

impl FeePolicyParams {
    /// Checks every parameter; the first violation is returned
    pub fn validate(&self) -> TrancheResult<()> {
        if self.target_subscription_ratio < TARGET_SR_LOWER_BOUND
            || self.target_subscription_ratio > TARGET_SR_UPPER_BOUND
        {
            return Err(TrancheError::InvalidTargetSubscriptionRatio { value: self.target_subscription_ratio });
        }

        let (hard, soft) = (&self.dr_hard_bound, &self.dr_soft_bound);
        if !hard.is_ordered() || !soft.is_ordered() || !hard.encloses(soft) {
            return Err(TrancheError::InvalidDeviationBounds);
        }

        if !self.rebal_eq_dr.contains(ONE) {
            return Err(TrancheError::InvalidRebalanceBand);
        }

        require_perc(self.perp_mint_fee_perc, "perp_mint_fee_perc")?;
        require_perc(self.perp_burn_fee_perc, "perp_burn_fee_perc")?;
        require_perc(self.vault_mint_fee_perc, "vault_mint_fee_perc")?;
        require_perc(self.vault_burn_fee_perc, "vault_burn_fee_perc")?;
        require_perc_range(&self.flash_mint_fee_percs, "flash_mint_fee_percs")?;
        require_perc_range(&self.flash_redeem_fee_percs, "flash_redeem_fee_percs")?;
        require_perc(self.debasement_system_tvl_perc, "debasement_system_tvl_perc")?;
        require_perc(self.enrichment_system_tvl_perc, "enrichment_system_tvl_perc")?;
        require_perc(self.debasement_protocol_share_perc, "debasement_protocol_share_perc")?;
        require_perc(self.enrichment_protocol_share_perc, "enrichment_protocol_share_perc")?;

        let fee = &self.rollover_fee;
        if fee.lower >= 0
            || fee.upper <= 0
            || fee.lower < -MAX_ASYMPTOTE
            || fee.upper > MAX_ASYMPTOTE
            || fee.growth <= 0
        {
            return Err(TrancheError::InvalidSigmoidParams);
        }
        Ok(())
    }
}

/// Parameter changes an owner can request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum FeePolicyUpdate {
    Owner(Address),
    TargetSubscriptionRatio(u64),
    DeviationBounds { hard: Range, soft: Range },
    RebalanceBand(Range),
    PerpMintFee(u64),
    PerpBurnFee(u64),
    VaultMintFee(u64),
    VaultBurnFee(u64),
    FlashMintFees(Range),
    FlashRedeemFees(Range),
    RebalanceCaps { debasement: u64, enrichment: u64 },
    ProtocolShares { debasement: u64, enrichment: u64 },
    RolloverFee(SigmoidParams),
}

impl FeePolicyUpdate {
    /// Configuration value this update touches
    pub fn param(&self) -> ConfigParam {
        match self {
            Self::Owner(_) => ConfigParam::Owner,
            Self::TargetSubscriptionRatio(_) => ConfigParam::TargetSubscriptionRatio,
            Self::DeviationBounds { .. } => ConfigParam::DeviationBounds,
            Self::RebalanceBand(_) => ConfigParam::RebalanceBand,
            Self::PerpMintFee(_) | Self::PerpBurnFee(_) => ConfigParam::PerpFees,
            Self::VaultMintFee(_) | Self::VaultBurnFee(_) => ConfigParam::VaultFees,
            Self::FlashMintFees(_) | Self::FlashRedeemFees(_) => ConfigParam::FlashFees,
            Self::RebalanceCaps { .. } => ConfigParam::RebalanceCaps,
            Self::ProtocolShares { .. } => ConfigParam::ProtocolShare,
            Self::RolloverFee(_) => ConfigParam::RolloverFee,
        }
    }
}

// ============ Fee Policy ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FeePolicy {
    owner: Address,
    params: FeePolicyParams,
}

impl FeePolicy {
    /// Fee policy with default parameters
    pub fn new(owner: Address) -> Self {
        Self { owner, params: FeePolicyParams::default() }
    }

    /// Fee policy with custom parameters, rejected if any is invalid
    pub fn with_params(owner: Address, params: FeePolicyParams) -> TrancheResult<Self> {
        params.validate()?;
        Ok(Self { owner, params })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn params(&self) -> &FeePolicyParams {
        &self.params
    }

    /// Applies an owner update. Nothing changes unless the resulting
    /// parameter set is valid as a whole.
    pub fn apply(&mut self, caller: &Address, update: &FeePolicyUpdate) -> TrancheResult<ConfigParam> {
        require_owner(self.owner, *caller)?;

        let mut next = self.params.clone();
        match update {
            FeePolicyUpdate::Owner(owner) => {
                require_valid_address(*owner, "owner")?;
                self.owner = *owner;
                return Ok(update.param());
            }
            FeePolicyUpdate::TargetSubscriptionRatio(value) => next.target_subscription_ratio = *value,
            FeePolicyUpdate::DeviationBounds { hard, soft } => {
                next.dr_hard_bound = *hard;
                next.dr_soft_bound = *soft;
            }
            FeePolicyUpdate::RebalanceBand(band) => next.rebal_eq_dr = *band,
            FeePolicyUpdate::PerpMintFee(perc) => next.perp_mint_fee_perc = *perc,
            FeePolicyUpdate::PerpBurnFee(perc) => next.perp_burn_fee_perc = *perc,
            FeePolicyUpdate::VaultMintFee(perc) => next.vault_mint_fee_perc = *perc,
            FeePolicyUpdate::VaultBurnFee(perc) => next.vault_burn_fee_perc = *perc,
            FeePolicyUpdate::FlashMintFees(percs) => next.flash_mint_fee_percs = *percs,
            FeePolicyUpdate::FlashRedeemFees(percs) => next.flash_redeem_fee_percs = *percs,
            FeePolicyUpdate::RebalanceCaps { debasement, enrichment } => {
                next.debasement_system_tvl_perc = *debasement;
                next.enrichment_system_tvl_perc = *enrichment;
            }
            FeePolicyUpdate::ProtocolShares { debasement, enrichment } => {
                next.debasement_protocol_share_perc = *debasement;
                next.enrichment_protocol_share_perc = *enrichment;
            }
            FeePolicyUpdate::RolloverFee(params) => next.rollover_fee = *params,
        }

        next.validate()?;
        self.params = next;
        Ok(update.param())
    }

    // ============ Deviation Ratio ============

    /// `(vault_tvl * senior_tr) / (perp_tvl * junior_tr) / target`.
    ///
    /// An empty perp reads as infinitely over-subscribed (`u64::MAX`).
    pub fn compute_deviation_ratio(&self, s: &SubscriptionState) -> TrancheResult<u64> {
        if s.senior_tr == 0 || s.senior_tr >= TRANCHE_RATIO_GRANULARITY {
            return Err(TrancheError::InvalidInput { param: "senior_tr", reason: "must lie strictly inside the granularity" });
        }
        if s.perp_tvl == 0 {
            return Ok(u64::MAX);
        }
        let junior_tr = TRANCHE_RATIO_GRANULARITY - s.senior_tr;

        // 1. Actual subscription ratio
        let numerator = (s.vault_tvl as u128) * (s.senior_tr as u128);
        let denominator = (s.perp_tvl as u128) * (junior_tr as u128);
        let subscription = mul_div_u128(numerator, ONE as u128, denominator, Rounding::Down)?;

        // 2. Relative to target
        let scaled = subscription.checked_mul(ONE as u128).ok_or(TrancheError::Overflow)?;
        clip_div_u128(scaled, self.params.target_subscription_ratio as u128)
    }

    // ============ Flat Fees ============

    pub fn compute_perp_mint_fee_perc(&self) -> u64 {
        self.params.perp_mint_fee_perc
    }

    pub fn compute_perp_burn_fee_perc(&self) -> u64 {
        self.params.perp_burn_fee_perc
    }

    pub fn compute_vault_mint_fee_perc(&self) -> u64 {
        self.params.vault_mint_fee_perc
    }

    pub fn compute_vault_burn_fee_perc(&self) -> u64 {
        self.params.vault_burn_fee_perc
    }

    // ============ Swap Fees ============

    /// Vault fee for swapping underlying into perps. Such swaps grow the
    /// perp and push `dr` down; below the hard bound the fee is 100%.
    pub fn compute_underlying_to_perp_vault_swap_fee_perc(&self, dr_pre: u64, dr_post: u64) -> TrancheResult<u64> {
        let hard = self.params.dr_hard_bound;
        let soft = self.params.dr_soft_bound;
        let fees = self.params.flash_mint_fee_percs;

        if dr_post <= hard.lower {
            return Ok(ONE);
        }

        let rising = Line::new(hard.lower, fees.upper as i128, soft.lower, fees.lower as i128);
        let flat = Line::flat(fees.lower as i128);
        let fee = compute_piecewise_avg_y(&rising, &flat, swap_range(dr_pre, dr_post), soft.lower)?;
        Ok(clamp_i128(fee, 0, ONE_I128) as u64)
    }

    /// Vault fee for swapping perps into underlying. Such swaps shrink the
    /// perp and push `dr` up; above the hard bound the fee is 100%.
    pub fn compute_perp_to_underlying_vault_swap_fee_perc(&self, dr_pre: u64, dr_post: u64) -> TrancheResult<u64> {
        let hard = self.params.dr_hard_bound;
        let soft = self.params.dr_soft_bound;
        let fees = self.params.flash_redeem_fee_percs;

        if dr_post >= hard.upper {
            return Ok(ONE);
        }

        let flat = Line::flat(fees.lower as i128);
        let rising = Line::new(soft.upper, fees.lower as i128, hard.upper, fees.upper as i128);
        let fee = compute_piecewise_avg_y(&flat, &rising, swap_range(dr_pre, dr_post), soft.upper)?;
        Ok(clamp_i128(fee, 0, ONE_I128) as u64)
    }

    // ============ Rollover Fee ============

    /// Signed rollover fee at `dr`; negative values reward the roller
    pub fn compute_perp_rollover_fee_perc(&self, dr: u64) -> TrancheResult<i128> {
        self.params.rollover_fee.eval(dr as i128, ONE_I128)
    }

    // ============ Rebalance ============

    /// Daily value flow between the pools.
    ///
    /// Inside the equilibrium band nothing moves. Otherwise the perp is
    /// moved toward the TVL it would hold at target, capped per direction,
    /// and the protocol takes its share (rounded up) out of the flow.
    pub fn compute_rebalance_data(&self, s: &SubscriptionState) -> TrancheResult<RebalanceData> {
        let dr = self.compute_deviation_ratio(s)?;
        if self.params.rebal_eq_dr.contains(dr) {
            return Ok(RebalanceData::default());
        }

        let total = (s.perp_tvl as u128) + (s.vault_tvl as u128);
        let junior_tr = TRANCHE_RATIO_GRANULARITY - s.senior_tr;

        // 1. Perp share of total TVL at target
        let senior_scaled = (s.senior_tr as u128) * (ONE as u128);
        let junior_scaled = (junior_tr as u128) * (self.params.target_subscription_ratio as u128);
        let perp_share = mul_div_u128(senior_scaled, ONE as u128, senior_scaled + junior_scaled, Rounding::Down)?;
        let required_perp_tvl = mul_div_u128(total, perp_share, ONE as u128, Rounding::Down)?;

        // 2. Signed move, capped per direction
        let delta = required_perp_tvl as i128 - s.perp_tvl as i128;
        let (magnitude, share) = if delta < 0 {
            let cap = mul_div_u128(total, self.params.debasement_system_tvl_perc as u128, ONE as u128, Rounding::Down)?;
            (delta.unsigned_abs().min(cap), self.params.debasement_protocol_share_perc)
        } else {
            let cap = mul_div_u128(total, self.params.enrichment_system_tvl_perc as u128, ONE as u128, Rounding::Down)?;
            (delta.unsigned_abs().min(cap), self.params.enrichment_protocol_share_perc)
        };
        let magnitude = u64::try_from(magnitude).map_err(|_| TrancheError::Overflow)?;

        // 3. Protocol cut
        let protocol_fee_amt = mul_div_up(magnitude, share, ONE)?;
        let net = (magnitude - protocol_fee_amt) as i128;

        Ok(RebalanceData {
            underlying_amt_into_perp: if delta < 0 { -net } else { net },
            protocol_fee_amt,
        })
    }

    /// Underlying left after deducting a fee percentage
    pub fn deduct_fee(&self, amount: u64, fee_perc: u64) -> TrancheResult<u64> {
        mul_div(amount, ONE.saturating_sub(fee_perc), ONE)
    }
}

fn swap_range(dr_pre: u64, dr_post: u64) -> Range {
    Range::new(dr_pre.min(dr_post), dr_pre.max(dr_post))
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Address = [1u8; 32];

    fn policy() -> FeePolicy {
        FeePolicy::new(OWNER)
    }

    /// Policy with target 1.0 so that equal TVLs at a 50/50 split are balanced
    fn balanced_policy() -> FeePolicy {
        let params = FeePolicyParams { target_subscription_ratio: ONE, ..FeePolicyParams::default() };
        FeePolicy::with_params(OWNER, params).unwrap()
    }

    fn state(perp_tvl: u64, vault_tvl: u64, senior_tr: u64) -> SubscriptionState {
        SubscriptionState { perp_tvl, vault_tvl, senior_tr }
    }

    #[test]
    fn test_default_params_valid() {
        assert!(FeePolicyParams::default().validate().is_ok());
    }

    #[test]
    fn test_with_params_rejects_invalid() {
        let params = FeePolicyParams { perp_burn_fee_perc: ONE + 1, ..FeePolicyParams::default() };
        assert!(FeePolicy::with_params(OWNER, params).is_err());
        assert_eq!(balanced_policy().params().target_subscription_ratio, ONE);
    }

    #[test]
    fn test_deviation_ratio_balanced() {
        let p = balanced_policy();
        assert_eq!(p.compute_deviation_ratio(&state(1_000, 1_000, 500)).unwrap(), ONE);
        assert_eq!(p.compute_deviation_ratio(&state(1_000, 2_000, 500)).unwrap(), 2 * ONE);

        // 20/80 split: vault needs 4x the perp to be balanced
        assert_eq!(p.compute_deviation_ratio(&state(1_000, 4_000, 200)).unwrap(), ONE);
    }

    #[test]
    fn test_deviation_ratio_empty_perp() {
        let p = policy();
        assert_eq!(p.compute_deviation_ratio(&state(0, 1_000, 250)).unwrap(), u64::MAX);
        assert!(p.compute_deviation_ratio(&state(1, 1, 0)).is_err());
        assert!(p.compute_deviation_ratio(&state(1, 1, 1_000)).is_err());
    }

    #[test]
    fn test_deviation_ratio_monotonicity() {
        let p = policy();
        for senior_tr in [200u64, 333, 500, 750] {
            let mut prev = 0;
            for vault_tvl in [1_000u64, 5_000, 50_000, 1_000_000] {
                let dr = p.compute_deviation_ratio(&state(100_000, vault_tvl, senior_tr)).unwrap();
                assert!(dr > prev);
                prev = dr;
            }
            let mut prev = u64::MAX;
            for perp_tvl in [1_000u64, 5_000, 50_000, 1_000_000] {
                let dr = p.compute_deviation_ratio(&state(perp_tvl, 100_000, senior_tr)).unwrap();
                assert!(dr < prev);
                prev = dr;
            }
        }
    }

    #[test]
    fn test_underlying_to_perp_fee_saturates() {
        let p = policy();
        assert_eq!(p.compute_underlying_to_perp_vault_swap_fee_perc(ONE, DEFAULT_DR_HARD_LOWER).unwrap(), ONE);
        assert_eq!(p.compute_underlying_to_perp_vault_swap_fee_perc(ONE, ONE / 2).unwrap(), ONE);
    }

    #[test]
    fn test_perp_to_underlying_fee_saturates() {
        let p = policy();
        assert_eq!(p.compute_perp_to_underlying_vault_swap_fee_perc(ONE, DEFAULT_DR_HARD_UPPER).unwrap(), ONE);
        assert_eq!(p.compute_perp_to_underlying_vault_swap_fee_perc(ONE, 5 * ONE).unwrap(), ONE);
    }

    #[test]
    fn test_swap_fee_inside_soft_bound() {
        let p = policy();
        assert_eq!(
            p.compute_underlying_to_perp_vault_swap_fee_perc(ONE * 12 / 10, ONE).unwrap(),
            DEFAULT_FLASH_FEE_LOWER
        );
        assert_eq!(
            p.compute_perp_to_underlying_vault_swap_fee_perc(ONE, ONE * 12 / 10).unwrap(),
            DEFAULT_FLASH_FEE_LOWER
        );
    }

    #[test]
    fn test_swap_fee_grows_toward_hard_bound() {
        let p = policy();
        let near = p.compute_underlying_to_perp_vault_swap_fee_perc(ONE * 9 / 10, ONE * 85 / 100).unwrap();
        let far = p.compute_underlying_to_perp_vault_swap_fee_perc(ONE * 9 / 10, ONE * 78 / 100).unwrap();
        assert!(DEFAULT_FLASH_FEE_LOWER < near && near < far && far < DEFAULT_FLASH_FEE_UPPER);

        let near = p.compute_perp_to_underlying_vault_swap_fee_perc(ONE * 5 / 4, ONE * 3 / 2).unwrap();
        let far = p.compute_perp_to_underlying_vault_swap_fee_perc(ONE * 5 / 4, ONE * 19 / 10).unwrap();
        assert!(DEFAULT_FLASH_FEE_LOWER < near && near < far && far < DEFAULT_FLASH_FEE_UPPER);
    }

    #[test]
    fn test_swap_fee_straddling_soft_bound() {
        let p = policy();
        // Half the move is inside the soft bound at the flat fee
        let fee = p.compute_underlying_to_perp_vault_swap_fee_perc(ONE, ONE * 8 / 10).unwrap();
        let below_only = p.compute_underlying_to_perp_vault_swap_fee_perc(ONE * 9 / 10, ONE * 8 / 10).unwrap();
        assert!(fee > DEFAULT_FLASH_FEE_LOWER && fee < below_only);
    }

    #[test]
    fn test_rollover_fee_curve() {
        let p = policy();
        assert_eq!(p.compute_perp_rollover_fee_perc(ONE).unwrap(), 0);
        let under = p.compute_perp_rollover_fee_perc(ONE / 2).unwrap();
        let over = p.compute_perp_rollover_fee_perc(2 * ONE).unwrap();
        assert!(under < 0 && under > DEFAULT_ROLLOVER_FEE_LOWER);
        assert!(over > 0 && over < DEFAULT_ROLLOVER_FEE_UPPER);
        assert!(p.compute_perp_rollover_fee_perc(u64::MAX).unwrap() <= DEFAULT_ROLLOVER_FEE_UPPER);
    }

    #[test]
    fn test_rebalance_equilibrium_noop() {
        let p = balanced_policy();
        for vault_tvl in [95_000u64, 99_000, 100_000, 104_999, 105_000] {
            let data = p.compute_rebalance_data(&state(100_000, vault_tvl, 500)).unwrap();
            assert!(data.is_noop(), "vault_tvl={}", vault_tvl);
        }
    }

    #[test]
    fn test_rebalance_enrichment_capped() {
        let p = balanced_policy();
        // dr = 2.0, perp should grow by 50_000 but is capped at 0.1% of 300_000
        let data = p.compute_rebalance_data(&state(100_000, 200_000, 500)).unwrap();
        assert_eq!(data, RebalanceData { underlying_amt_into_perp: 297, protocol_fee_amt: 3 });
    }

    #[test]
    fn test_rebalance_debasement_capped() {
        let p = balanced_policy();
        let data = p.compute_rebalance_data(&state(200_000, 100_000, 500)).unwrap();
        assert_eq!(data, RebalanceData { underlying_amt_into_perp: -297, protocol_fee_amt: 3 });
    }

    #[test]
    fn test_rebalance_uncapped_fee_rounds_up() {
        let mut p = balanced_policy();
        p.apply(&OWNER, &FeePolicyUpdate::RebalanceCaps { debasement: ONE, enrichment: ONE }).unwrap();
        let data = p.compute_rebalance_data(&state(100_000, 200_000, 500)).unwrap();
        assert_eq!(data, RebalanceData { underlying_amt_into_perp: 49_500, protocol_fee_amt: 500 });

        p.apply(&OWNER, &FeePolicyUpdate::ProtocolShares { debasement: ONE / 3, enrichment: ONE / 3 }).unwrap();
        let data = p.compute_rebalance_data(&state(200_000, 100_000, 500)).unwrap();
        // 50_000 / 3 = 16_666.67, rounded up
        assert_eq!(data, RebalanceData { underlying_amt_into_perp: -33_333, protocol_fee_amt: 16_667 });
    }

    #[test]
    fn test_apply_rejects_without_mutation() {
        let mut p = policy();
        let before = p.params().clone();

        assert!(matches!(
            p.apply(&OWNER, &FeePolicyUpdate::PerpMintFee(ONE + 1)),
            Err(TrancheError::InvalidPerc { .. })
        ));
        assert_eq!(
            p.apply(&OWNER, &FeePolicyUpdate::DeviationBounds {
                hard: Range::new(ONE, 2 * ONE),
                soft: Range::new(ONE / 2, ONE),
            }),
            Err(TrancheError::InvalidDeviationBounds)
        );
        assert_eq!(
            p.apply(&OWNER, &FeePolicyUpdate::RebalanceBand(Range::new(ONE + 1, 2 * ONE))),
            Err(TrancheError::InvalidRebalanceBand)
        );
        assert_eq!(
            p.apply(&OWNER, &FeePolicyUpdate::TargetSubscriptionRatio(ONE / 2)),
            Err(TrancheError::InvalidTargetSubscriptionRatio { value: ONE / 2 })
        );
        assert_eq!(
            p.apply(&OWNER, &FeePolicyUpdate::FlashMintFees(Range::new(ONE / 10, ONE / 100))),
            Err(TrancheError::InvalidFeeRange)
        );
        assert_eq!(
            p.apply(&OWNER, &FeePolicyUpdate::RolloverFee(SigmoidParams { lower: ONE_I128 / 100, upper: ONE_I128, growth: ONE_I128 })),
            Err(TrancheError::InvalidSigmoidParams)
        );
        assert_eq!(p.params(), &before);
    }

    #[test]
    fn test_apply_owner_only() {
        let mut p = policy();
        assert!(matches!(
            p.apply(&[2u8; 32], &FeePolicyUpdate::PerpMintFee(1)),
            Err(TrancheError::Unauthorized { .. })
        ));

        assert_eq!(p.apply(&OWNER, &FeePolicyUpdate::Owner([2u8; 32])).unwrap(), ConfigParam::Owner);
        assert_eq!(p.owner(), [2u8; 32]);
        assert!(p.apply(&OWNER, &FeePolicyUpdate::PerpMintFee(1)).is_err());
    }

    #[test]
    fn test_flat_fees() {
        let mut p = policy();
        p.apply(&OWNER, &FeePolicyUpdate::PerpMintFee(ONE / 100)).unwrap();
        p.apply(&OWNER, &FeePolicyUpdate::VaultBurnFee(ONE / 200)).unwrap();
        assert_eq!(p.compute_perp_mint_fee_perc(), ONE / 100);
        assert_eq!(p.compute_perp_burn_fee_perc(), 0);
        assert_eq!(p.compute_vault_burn_fee_perc(), ONE / 200);
        assert_eq!(p.deduct_fee(1_000, ONE / 100).unwrap(), 990);
    }
}
