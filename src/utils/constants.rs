//! Pool constants and magic numbers.
//!
//! All pool-wide constants are defined here for easy auditing and modification.

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED-POINT PRECISION
// ═══════════════════════════════════════════════════════════════════════════════

/// One unit in 18-decimal fixed point (1.0)
pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Factor applied to P when it would fall below `SCALE_FACTOR`
/// (one scale step is nine decimal orders of magnitude)
pub const SCALE_FACTOR: u128 = 1_000_000_000;

/// Compounded deposits smaller than `initial / DUST_DIVISOR` are treated as zero
pub const DUST_DIVISOR: u128 = 1_000_000_000;

/// Default bound on scale crossings applied within a single offset
pub const DEFAULT_MAX_SCALE_CROSSINGS: u32 = 2;

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Decimals of every token the pool handles (ZUSD, RBTC collateral, ZERO)
pub const TOKEN_DECIMALS: u32 = 18;

/// ZUSD symbol
pub const ZUSD_SYMBOL: &str = "ZUSD";

/// Collateral symbol
pub const COLLATERAL_SYMBOL: &str = "RBTC";

/// Governance token symbol
pub const ZERO_SYMBOL: &str = "ZERO";

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Account identifier length in bytes
pub const ACCOUNT_ID_LENGTH: usize = 20;

/// Hash length in bytes
pub const HASH_LENGTH: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default number of events kept in the in-memory log
pub const DEFAULT_EVENT_RETENTION: usize = 10_000;
