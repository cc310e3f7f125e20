use bitcoin::Amount;

use crate::config::BumpConfig;
use crate::constants::{EMERGENCY_RESERVE_SATS, MAX_BUILD_RETRIES};

/// Snapshot of the operator settings a bumper is constructed with.
///
/// The snapshot never changes during the lifetime of a [`crate::bumper::ChannelOpenBumper`],
/// every request is evaluated against the same values.
#[derive(Debug, Clone, PartialEq)]
pub struct BumpSettings {
    /// Broadcast and accept reserve breaches when a request does not say otherwise.
    pub yolo: bool,
    /// Floor for the confirmed, unreserved wallet balance after a bump.
    pub reserve_threshold: Amount,
    /// How many extra wallet inputs the builder may add after a shortfall.
    pub max_build_retries: u32,
}

impl Default for BumpSettings {
    fn default() -> Self {
        Self {
            yolo: false,
            reserve_threshold: Amount::from_sat(EMERGENCY_RESERVE_SATS),
            max_build_retries: MAX_BUILD_RETRIES,
        }
    }
}

impl From<&BumpConfig> for BumpSettings {
    fn from(config: &BumpConfig) -> Self {
        Self {
            yolo: config.yolo,
            max_build_retries: config.max_build_retries,
            ..Self::default()
        }
    }
}
