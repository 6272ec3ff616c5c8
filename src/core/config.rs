//! Pool configuration and parameters.
//!
//! Parameters are divided into:
//! - `PoolParams`: numeric knobs of the reward algorithm, fixed once the pool
//!   holds deposits
//! - `PoolConfig`: operational settings (who may call `offset`, how
//!   over-withdrawals are treated, event retention)
//!
//! A config is read from a JSON file and can be overridden with `ZUSD_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::AccountId;

// ═══════════════════════════════════════════════════════════════════════════════
// POOL PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Numeric parameters of the reward algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    /// Crate version that produced these parameters
    pub version: String,

    /// Maximum number of scale increments applied by one offset.
    /// If `P` still rounds to zero after this many, the offset is refused.
    pub max_scale_crossings: u32,

    /// Compounded deposits below `initial / dust_divisor` count as zero
    pub dust_divisor: u128,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_scale_crossings: DEFAULT_MAX_SCALE_CROSSINGS,
            dust_divisor: DUST_DIVISOR,
        }
    }
}

impl PoolParams {
    /// Create with a custom crossing bound (for testing)
    pub fn with_max_scale_crossings(mut self, crossings: u32) -> Self {
        self.max_scale_crossings = crossings;
        self
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        if self.max_scale_crossings == 0 {
            return Err(Error::InvalidParameter {
                name: "max_scale_crossings".into(),
                reason: "must allow at least one scale crossing".into(),
            });
        }
        if self.dust_divisor == 0 {
            return Err(Error::InvalidParameter {
                name: "dust_divisor".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WITHDRAWAL POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// How a withdrawal larger than the compounded deposit is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalPolicy {
    /// Withdraw the whole compounded deposit instead
    #[default]
    Clamp,
    /// Refuse with `WithdrawalExceedsDeposit`
    Reject,
}

impl std::str::FromStr for WithdrawalPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "clamp" => Ok(WithdrawalPolicy::Clamp),
            "reject" => Ok(WithdrawalPolicy::Reject),
            _ => Err(Error::InvalidParameter {
                name: "withdrawal_policy".into(),
                reason: format!("unknown policy: {}", s),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Operational configuration of a stability pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Algorithm parameters
    pub params: PoolParams,

    /// The only account allowed to call `offset`
    pub liquidation_manager: AccountId,

    /// Over-withdrawal handling
    pub withdrawal_policy: WithdrawalPolicy,

    /// Check the accumulator invariants of every offset before it commits
    pub check_invariants: bool,

    /// Events kept in the in-memory log before the oldest are dropped
    pub event_retention: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            params: PoolParams::default(),
            liquidation_manager: AccountId::from_label("liquidation-manager"),
            withdrawal_policy: WithdrawalPolicy::Clamp,
            check_invariants: true,
            event_retention: DEFAULT_EVENT_RETENTION,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given liquidation manager
    pub fn new(liquidation_manager: AccountId) -> Self {
        Self {
            liquidation_manager,
            ..Default::default()
        }
    }

    /// Set the withdrawal policy
    pub fn with_withdrawal_policy(mut self, policy: WithdrawalPolicy) -> Self {
        self.withdrawal_policy = policy;
        self
    }

    /// Set the algorithm parameters
    pub fn with_params(mut self, params: PoolParams) -> Self {
        self.params = params;
        self
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| Error::Storage(e.to_string()))
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `ZUSD_*` environment overrides on top of this configuration
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(manager) = std::env::var("ZUSD_LIQUIDATION_MANAGER") {
            self.liquidation_manager = manager.parse()?;
        }

        if let Ok(policy) = std::env::var("ZUSD_WITHDRAWAL_POLICY") {
            self.withdrawal_policy = policy.parse()?;
        }

        if let Ok(crossings) = std::env::var("ZUSD_MAX_SCALE_CROSSINGS") {
            self.params.max_scale_crossings =
                crossings.parse().map_err(|_| Error::InvalidParameter {
                    name: "ZUSD_MAX_SCALE_CROSSINGS".into(),
                    reason: format!("not a number: {}", crossings),
                })?;
        }

        if let Ok(retention) = std::env::var("ZUSD_EVENT_RETENTION") {
            self.event_retention = retention.parse().map_err(|_| Error::InvalidParameter {
                name: "ZUSD_EVENT_RETENTION".into(),
                reason: format!("not a number: {}", retention),
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.event_retention == 0 {
            return Err(Error::InvalidParameter {
                name: "event_retention".into(),
                reason: "must keep at least one event".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.withdrawal_policy, WithdrawalPolicy::Clamp);
        assert_eq!(config.params.max_scale_crossings, DEFAULT_MAX_SCALE_CROSSINGS);
    }

    #[test]
    fn test_params_validation() {
        let params = PoolParams::default().with_max_scale_crossings(0);
        assert!(params.validate().is_err());

        let mut params = PoolParams::default();
        params.dust_divisor = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_withdrawal_policy_parsing() {
        assert_eq!("clamp".parse::<WithdrawalPolicy>().unwrap(), WithdrawalPolicy::Clamp);
        assert_eq!("REJECT".parse::<WithdrawalPolicy>().unwrap(), WithdrawalPolicy::Reject);
        assert!("maybe".parse::<WithdrawalPolicy>().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");

        let config = PoolConfig::new(AccountId::from_label("trove-manager"))
            .with_withdrawal_policy(WithdrawalPolicy::Reject);
        config.save(&path).unwrap();

        let loaded = PoolConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");

        let mut config = PoolConfig::default();
        config.event_retention = 0;
        config.save(&path).unwrap();

        assert!(PoolConfig::load(&path).is_err());
    }
}
