//! Utility modules for the ZUSD stability pool.
//!
//! This module contains shared utilities used across the crate:
//! - Account identifiers and hashes
//! - Fixed-point arithmetic with explicit rounding
//! - Constants

pub mod constants;
pub mod crypto;
pub mod math;

pub use constants::*;
pub use crypto::*;
pub use math::*;
