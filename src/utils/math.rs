//! Fixed-point arithmetic and mathematical utilities.
//!
//! Every division in the pool names its rounding direction. Intermediate
//! products run in 256 bits (`U256`), so `amount * P` and the gain sums never
//! wrap; narrowing back to `u128` is checked.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::constants::DECIMAL_PRECISION;

// ═══════════════════════════════════════════════════════════════════════════════
// ROUNDING
// ═══════════════════════════════════════════════════════════════════════════════

/// Rounding direction for a fixed-point division
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Truncate toward zero
    Down,
    /// Round away from zero when there is a remainder
    Up,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point number with 18 decimal places precision.
///
/// Used for the running product `P`, per-unit losses and front-end kickback
/// rates. Arithmetic goes through explicit, checked helpers; there are no
/// operator overloads, so every call site picks its rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FixedPoint(u128);

impl FixedPoint {
    /// Scale factor: 10^18
    pub const SCALE: u128 = DECIMAL_PRECISION;

    /// Zero value
    pub const ZERO: Self = Self(0);

    /// One (1.0)
    pub const ONE: Self = Self(Self::SCALE);

    /// Create a new FixedPoint from raw value
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Create from percentage (100 = 100%)
    pub fn from_percentage(pct: u64) -> Self {
        Self((pct as u128) * Self::SCALE / 100)
    }

    /// Get the raw underlying value
    pub const fn raw(&self) -> u128 {
        self.0
    }

    /// Check if value is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// True when the value lies in [0, 1]
    pub fn is_fraction(&self) -> bool {
        self.0 <= Self::SCALE
    }

    /// `1 - self`, failing when `self > 1`
    pub fn complement(&self) -> Result<Self> {
        Self::SCALE
            .checked_sub(self.0)
            .map(Self)
            .ok_or_else(|| Error::Underflow {
                operation: format!("1 - {}", self),
            })
    }

    /// `amount * self`, rounded as requested
    pub fn mul_amount(&self, amount: u128, rounding: Rounding) -> Result<u128> {
        let product = mul_div(
            U256::from(amount),
            U256::from(self.0),
            U256::from(Self::SCALE),
            rounding,
        )?;
        to_u128(product, "fixed-point multiply")
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let frac = self.0 % Self::SCALE;
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            let digits = format!("{:018}", frac);
            write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// 256-BIT HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Narrow a 256-bit value back to `u128`
pub fn to_u128(value: U256, operation: &str) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: operation.to_string(),
        });
    }
    Ok(value.low_u128())
}

/// Checked 256-bit addition
pub fn add_u256(a: U256, b: U256, operation: &str) -> Result<U256> {
    a.checked_add(b).ok_or_else(|| Error::Overflow {
        operation: operation.to_string(),
    })
}

/// Checked 256-bit subtraction
pub fn sub_u256(a: U256, b: U256, operation: &str) -> Result<U256> {
    a.checked_sub(b).ok_or_else(|| Error::Underflow {
        operation: operation.to_string(),
    })
}

/// Checked 256-bit multiplication
pub fn mul_u256(a: U256, b: U256, operation: &str) -> Result<U256> {
    a.checked_mul(b).ok_or_else(|| Error::Overflow {
        operation: operation.to_string(),
    })
}

/// Computes `(a * b) / c` with the requested rounding
pub fn mul_div(a: U256, b: U256, c: U256, rounding: Rounding) -> Result<U256> {
    if c.is_zero() {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }
    let product = mul_u256(a, b, "mul_div")?;
    let quotient = product / c;
    match rounding {
        Rounding::Down => Ok(quotient),
        Rounding::Up => {
            if (product % c).is_zero() {
                Ok(quotient)
            } else {
                add_u256(quotient, U256::one(), "mul_div round up")
            }
        }
    }
}

/// Floor division returning `(quotient, remainder)`.
///
/// The remainder is what the pool carries forward as its rounding error.
pub fn div_rem(numerator: U256, divisor: U256) -> Result<(U256, U256)> {
    if divisor.is_zero() {
        return Err(Error::InvalidParameter {
            name: "divisor".into(),
            reason: "division by zero".into(),
        });
    }
    let quotient = numerator / divisor;
    let remainder = numerator - quotient * divisor;
    Ok((quotient, remainder))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Absolute difference of two raw amounts
pub fn abs_diff(a: u128, b: u128) -> u128 {
    if a > b {
        a - b
    } else {
        b - a
    }
}
