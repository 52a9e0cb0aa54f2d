//! Bounded Sigmoid Curve
//!
//! `y(x) = (upper - lower) / (1 - (upper / lower) / 2^(growth * (x - one) / one)) + lower`
//!
//! With `lower < 0 < upper` the curve crosses zero at `x = one` and is
//! increasing in `x` for positive growth. The exponent is clamped to
//! `+/- MAX_EXPONENT_WHOLE * one` before the power is taken, so very large
//! inputs saturate to exactly `lower` or `upper` instead of failing.

use crate::constants::sigmoid::MAX_EXPONENT_WHOLE;
use crate::errors::{TrancheError, TrancheResult};
use crate::types::SigmoidParams;

/// `2^(1/2)`, `2^(1/4)`, ... `2^(1/32)` scaled by `KS_PRECISION`
const KS: [u128; 5] = [
    1_414_213_562_373_095_049,
    1_189_207_115_002_721_067,
    1_090_507_732_665_257_659,
    1_044_273_782_427_413_840,
    1_021_897_148_654_116_678,
];

const KS_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Computes `2^(exponent / one)` scaled by `one`.
///
/// The fractional part is resolved five binary digits deep by repeated
/// doubling against the root table, then shifted by the whole part. Fails
/// with `ExponentTooLarge` when `|exponent| > MAX_EXPONENT_WHOLE * one`.
pub fn two_power(exponent: i128, one: i128) -> TrancheResult<u128> {
    if one <= 0 {
        return Err(TrancheError::InvalidInput { param: "one", reason: "must be positive" });
    }
    let one_u = one as u128;
    let magnitude = exponent.unsigned_abs();
    let whole = magnitude / one_u;
    if whole > MAX_EXPONENT_WHOLE as u128 {
        return Err(TrancheError::ExponentTooLarge { exponent });
    }

    let mut fractional = magnitude % one_u;
    let mut result = one_u;
    for k in KS.iter() {
        fractional *= 2;
        if fractional >= one_u {
            fractional -= one_u;
            result = result
                .checked_mul(*k)
                .ok_or(TrancheError::Overflow)?
                / KS_PRECISION;
        }
    }

    let shift = 1u128 << whole;
    result = result.checked_mul(shift).ok_or(TrancheError::Overflow)?;

    if exponent < 0 {
        // one^2 fits comfortably in u128 for any sane precision
        let scaled = one_u.checked_mul(one_u).ok_or(TrancheError::Overflow)?;
        result = scaled / result;
    }
    Ok(result)
}

/// Evaluates the sigmoid at `x`.
///
/// The result lies strictly between `lower` and `upper` while the exponent
/// is inside `±MAX_EXPONENT_WHOLE * one`. Once it hits that clamp the curve
/// has flattened below fixed-point precision and the result is exactly
/// `lower` or `upper`, so the bounds are inclusive at the extremes.
pub fn sigmoid(x: i128, lower: i128, upper: i128, growth: i128, one: i128) -> TrancheResult<i128> {
    if lower == 0 {
        return Err(TrancheError::InvalidSigmoidParams);
    }
    let max_exp = MAX_EXPONENT_WHOLE * one;

    let delta = x.checked_sub(one).ok_or(TrancheError::Underflow)?;
    let exp = growth
        .checked_mul(delta)
        .ok_or(TrancheError::Overflow)?
        / one;
    let exp = exp.clamp(-max_exp, max_exp);

    let pow = two_power(exp, one)?;
    if pow == 0 {
        return Ok(lower);
    }

    let numerator = upper.checked_sub(lower).ok_or(TrancheError::Overflow)?;
    let ratio = upper.checked_mul(one).ok_or(TrancheError::Overflow)? / lower;
    // Past i128::MAX the quotient below is zero anyway
    let intermediate = match i128::try_from(pow) {
        Ok(pow) => ratio.checked_mul(one).ok_or(TrancheError::Overflow)? / pow,
        Err(_) => 0,
    };
    let denominator = one.checked_sub(intermediate).ok_or(TrancheError::Overflow)?;
    if denominator == 0 {
        return Err(TrancheError::DivisionByZero);
    }

    let y = numerator.checked_mul(one).ok_or(TrancheError::Overflow)? / denominator;
    y.checked_add(lower).ok_or(TrancheError::Overflow)
}

impl SigmoidParams {
    /// Evaluates the curve described by these parameters at `x`
    pub fn eval(&self, x: i128, one: i128) -> TrancheResult<i128> {
        sigmoid(x, self.lower, self.upper, self.growth, one)
    }
}
