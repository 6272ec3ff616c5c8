//! Point-in-time copies of the global accumulators.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::utils::math::FixedPoint;

/// Global state captured when a deposit was last settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Running product `P`
    pub p: FixedPoint,
    /// Collateral gain sum `S[epoch][scale]`
    pub s: U256,
    /// ZERO reward sum `G[epoch][scale]`
    pub g: U256,
    /// Epoch
    pub epoch: u64,
    /// Scale
    pub scale: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            p: FixedPoint::ONE,
            s: U256::zero(),
            g: U256::zero(),
            epoch: 0,
            scale: 0,
        }
    }
}

/// Global state captured when a front end's stake was last settled.
///
/// Front ends earn ZERO only, so there is no collateral sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontEndSnapshot {
    /// Running product `P`
    pub p: FixedPoint,
    /// ZERO reward sum `G[epoch][scale]`
    pub g: U256,
    /// Epoch
    pub epoch: u64,
    /// Scale
    pub scale: u64,
}

impl Default for FrontEndSnapshot {
    fn default() -> Self {
        Self {
            p: FixedPoint::ONE,
            g: U256::zero(),
            epoch: 0,
            scale: 0,
        }
    }
}

impl From<Snapshot> for FrontEndSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            p: snapshot.p,
            g: snapshot.g,
            epoch: snapshot.epoch,
            scale: snapshot.scale,
        }
    }
}
