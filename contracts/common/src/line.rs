//! Piecewise-linear Helpers
//!
//! Fee curves are made of two line segments joined at a breakpoint. A fee
//! charged over a trade is the average of the curve across the interval the
//! trade moves the deviation ratio through.

use crate::errors::{TrancheError, TrancheResult};
use crate::types::{Line, Range};

impl Line {
    /// Evaluates the line at `x`
    pub fn compute_y(&self, x: u64) -> TrancheResult<i128> {
        if self.y1 == self.y2 || self.x1 == self.x2 {
            return Ok(self.y1);
        }
        let dx = self.x2 as i128 - self.x1 as i128;
        let dy = self.y2.checked_sub(self.y1).ok_or(TrancheError::Overflow)?;
        let offset = (x as i128 - self.x1 as i128)
            .checked_mul(dy)
            .ok_or(TrancheError::Overflow)?
            / dx;
        self.y1.checked_add(offset).ok_or(TrancheError::Overflow)
    }

    /// Average value of the line over `[x_lower, x_upper]`
    pub fn avg_y(&self, x_lower: u64, x_upper: u64) -> TrancheResult<i128> {
        if self.y1 == self.y2 {
            return Ok(self.y2);
        }
        if x_lower == x_upper {
            return self.compute_y(x_lower);
        }
        if self.x1 == self.x2 {
            return Ok(self.y1);
        }
        // y at the interval midpoint, kept in doubled form to avoid halving early
        let dx = self.x2 as i128 - self.x1 as i128;
        let dy = self.y2.checked_sub(self.y1).ok_or(TrancheError::Overflow)?;
        let twice_mid_offset = (x_lower as i128 + x_upper as i128) - 2 * self.x1 as i128;
        let offset = twice_mid_offset
            .checked_mul(dy)
            .ok_or(TrancheError::Overflow)?
            / (2 * dx);
        self.y1.checked_add(offset).ok_or(TrancheError::Overflow)
    }
}

/// Averages a two-segment function over `range`.
///
/// `fn1` applies below `breakpoint` and `fn2` above it. When the range
/// straddles the breakpoint each side is weighted by its length.
pub fn compute_piecewise_avg_y(fn1: &Line, fn2: &Line, range: Range, breakpoint: u64) -> TrancheResult<i128> {
    if range.lower > range.upper {
        return Err(TrancheError::InvalidRange { lower: range.lower, upper: range.upper });
    }

    if range.upper <= breakpoint {
        return fn1.avg_y(range.lower, range.upper);
    }
    if range.lower >= breakpoint {
        return fn2.avg_y(range.lower, range.upper);
    }

    let below = (breakpoint - range.lower) as i128;
    let above = (range.upper - breakpoint) as i128;
    let y1 = fn1.avg_y(range.lower, breakpoint)?;
    let y2 = fn2.avg_y(breakpoint, range.upper)?;

    let weighted = y1
        .checked_mul(below)
        .and_then(|a| y2.checked_mul(above).and_then(|b| a.checked_add(b)))
        .ok_or(TrancheError::Overflow)?;
    Ok(weighted / (below + above))
}
