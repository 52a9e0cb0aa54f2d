//! Fixed-point Math for the Tranche Protocol
//!
//! Checked mul-div with explicit rounding. Products are formed in `u128`
//! (a product of two `u64` values always fits) and the quotient must fit
//! back into `u64`.

use crate::errors::{TrancheError, TrancheResult};

/// Rounding direction for divisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// `a * b / c` rounded down
pub fn mul_div(a: u64, b: u64, c: u64) -> TrancheResult<u64> {
    mul_div_rounding(a, b, c, Rounding::Down)
}

/// `a * b / c` rounded up
pub fn mul_div_up(a: u64, b: u64, c: u64) -> TrancheResult<u64> {
    mul_div_rounding(a, b, c, Rounding::Up)
}

/// `a * b / c` with the given rounding
pub fn mul_div_rounding(a: u64, b: u64, c: u64, rounding: Rounding) -> TrancheResult<u64> {
    let q = mul_div_u128(a as u128, b as u128, c as u128, rounding)?;
    u64::try_from(q).map_err(|_| TrancheError::Overflow)
}

/// `a * b / c` over `u128` with the given rounding
pub fn mul_div_u128(a: u128, b: u128, c: u128, rounding: Rounding) -> TrancheResult<u128> {
    if c == 0 {
        return Err(TrancheError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(TrancheError::Overflow)?;
    let q = product / c;
    match rounding {
        Rounding::Up if product % c != 0 => q.checked_add(1).ok_or(TrancheError::Overflow),
        _ => Ok(q),
    }
}

/// Divide and clip the result to `u64::MAX` instead of failing on overflow
pub fn clip_div_u128(a: u128, b: u128) -> TrancheResult<u64> {
    if b == 0 {
        return Err(TrancheError::DivisionByZero);
    }
    Ok((a / b).min(u64::MAX as u128) as u64)
}

/// Clamp a signed value into `[lower, upper]`
pub fn clamp_i128(x: i128, lower: i128, upper: i128) -> i128 {
    x.max(lower).min(upper)
}

/// Safe addition with overflow check
pub fn safe_add(a: u64, b: u64) -> TrancheResult<u64> {
    a.checked_add(b).ok_or(TrancheError::Overflow)
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u64, b: u64) -> TrancheResult<u64> {
    a.checked_sub(b).ok_or(TrancheError::Underflow)
}
