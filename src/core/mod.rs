//! Core modules for the ZUSD stability pool.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and pool parameters
//! - Strongly-typed token amounts

pub mod config;
pub mod token;

pub use config::*;
pub use token::*;
