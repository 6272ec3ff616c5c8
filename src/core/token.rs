//! Token amounts handled by the stability pool.
//!
//! Three strongly-typed amounts keep the ledger from mixing units:
//! - `TokenAmount`: ZUSD stake units (deposits, offset debt)
//! - `CollateralAmount`: RBTC collateral gains
//! - `ZeroTokenAmount`: ZERO governance-token rewards
//!
//! All three carry 18 decimals and are stored as raw `u128` base units.

use primitive_types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::math::FixedPoint;

/// Parse a non-negative decimal string with at most 18 decimals into base units
pub fn parse_units(s: &str) -> Result<u128> {
    let value = Decimal::from_str(s.trim()).map_err(|e| Error::InvalidParameter {
        name: "amount".into(),
        reason: e.to_string(),
    })?;

    if value.is_sign_negative() {
        return Err(Error::InvalidParameter {
            name: "amount".into(),
            reason: "amount cannot be negative".into(),
        });
    }

    if value.scale() > TOKEN_DECIMALS {
        return Err(Error::InvalidParameter {
            name: "amount".into(),
            reason: format!("more than {} decimal places", TOKEN_DECIMALS),
        });
    }

    let mantissa = value.mantissa() as u128;
    let factor = 10u128.pow(TOKEN_DECIMALS - value.scale());
    mantissa.checked_mul(factor).ok_or(Error::Overflow {
        operation: format!("parse amount {}", s),
    })
}

/// Render base units as a decimal string without trailing zeros
pub fn format_units(raw: u128) -> String {
    FixedPoint::from_raw(raw).to_string()
}

macro_rules! define_amount {
    ($(#[$meta:meta])* $name:ident, $symbol:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name(u128);

        impl $name {
            /// Zero amount
            pub const ZERO: Self = Self(0);

            /// Ticker symbol used when displaying the amount
            pub const SYMBOL: &'static str = $symbol;

            /// Create from raw base units (18 decimals)
            pub const fn from_raw(raw: u128) -> Self {
                Self(raw)
            }

            /// Create from whole tokens
            pub fn from_whole(units: u64) -> Self {
                Self((units as u128) * DECIMAL_PRECISION)
            }

            /// Parse a decimal string such as `"99.5"`
            pub fn parse(s: &str) -> Result<Self> {
                parse_units(s).map(Self)
            }

            /// Get raw base units
            pub const fn raw(&self) -> u128 {
                self.0
            }

            /// Widen to 256 bits for intermediate arithmetic
            pub fn to_u256(&self) -> U256 {
                U256::from(self.0)
            }

            /// Check if zero
            pub fn is_zero(&self) -> bool {
                self.0 == 0
            }

            /// Saturating addition
            pub fn saturating_add(self, other: Self) -> Self {
                Self(self.0.saturating_add(other.0))
            }

            /// Saturating subtraction
            pub fn saturating_sub(self, other: Self) -> Self {
                Self(self.0.saturating_sub(other.0))
            }

            /// Checked addition
            pub fn checked_add(self, other: Self) -> Option<Self> {
                self.0.checked_add(other.0).map(Self)
            }

            /// Checked subtraction
            pub fn checked_sub(self, other: Self) -> Option<Self> {
                self.0.checked_sub(other.0).map(Self)
            }

            /// Decimal representation without symbol
            pub fn to_decimal_string(&self) -> String {
                format_units(self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} {}", self.to_decimal_string(), Self::SYMBOL)
            }
        }

        impl From<u128> for $name {
            fn from(raw: u128) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u128 {
            fn from(amount: $name) -> Self {
                amount.0
            }
        }
    };
}

define_amount!(
    /// Amount of ZUSD (stake units deposited into the pool)
    TokenAmount,
    ZUSD_SYMBOL
);

define_amount!(
    /// Amount of RBTC collateral (liquidation gains)
    CollateralAmount,
    COLLATERAL_SYMBOL
);

define_amount!(
    /// Amount of ZERO governance tokens (issuance rewards)
    ZeroTokenAmount,
    ZERO_SYMBOL
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_whole() {
        let amount = TokenAmount::from_whole(10_000);
        assert_eq!(amount.raw(), 10_000 * DECIMAL_PRECISION);
        assert!(!amount.is_zero());
        assert!(TokenAmount::ZERO.is_zero());
    }

    #[test]
    fn test_parse_decimal() {
        let gain = CollateralAmount::parse("99.5").unwrap();
        assert_eq!(gain.raw(), 99_500_000_000_000_000_000);

        let tiny = TokenAmount::parse("0.000000000000000001").unwrap();
        assert_eq!(tiny.raw(), 1);

        assert_eq!(TokenAmount::parse("10000").unwrap(), TokenAmount::from_whole(10_000));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(TokenAmount::parse("-1").is_err());
        assert!(TokenAmount::parse("abc").is_err());
        assert!(TokenAmount::parse("0.0000000000000000001").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenAmount::from_whole(5).to_string(), "5 ZUSD");
        assert_eq!(CollateralAmount::parse("0.25").unwrap().to_string(), "0.25 RBTC");
        assert_eq!(ZeroTokenAmount::ZERO.to_string(), "0 ZERO");
    }

    #[test]
    fn test_checked_ops() {
        let a = TokenAmount::from_raw(5);
        let b = TokenAmount::from_raw(7);
        assert_eq!(a.checked_add(b), Some(TokenAmount::from_raw(12)));
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(a.saturating_sub(b), TokenAmount::ZERO);
    }
}
