//! Fee computations for a child paying for its unconfirmed parent.

use bitcoin::Amount;

use crate::errors::BumpError;
use crate::types::{FeeRate, FeeTarget, ParentTransaction};

/// Fee still owed by the child so that parent and child together pay `rate`.
///
/// Zero when the parent alone already pays at or above `rate`.
pub fn package_deficit(parent: &ParentTransaction, child_vsize: u64, rate: FeeRate) -> Amount {
    let required_total = rate.fee_for_vsize(parent.vsize + child_vsize);
    required_total
        .checked_sub(parent.fee)
        .unwrap_or(Amount::ZERO)
}

/// Smallest fee the child can relay with on its own. Never below one sat.
pub fn relay_floor(child_vsize: u64, min_relay: FeeRate) -> Amount {
    min_relay
        .fee_for_vsize(child_vsize)
        .max(Amount::from_sat(1))
}

/// Fee the child must carry for `target`, given its vsize.
pub fn required_child_fee(
    parent: &ParentTransaction,
    child_vsize: u64,
    target: &FeeTarget,
    min_relay: FeeRate,
) -> Result<Amount, BumpError> {
    let floor = relay_floor(child_vsize, min_relay);

    match target {
        FeeTarget::PackageRate(rate) => {
            let deficit = package_deficit(parent, child_vsize, *rate);
            Ok(deficit.max(floor))
        }
        FeeTarget::AbsoluteFee(fee) => {
            if *fee < floor {
                return Err(BumpError::InvalidRequest(format!(
                    "Child fee of {} sats is below the {} sats required to relay a {} vB transaction at {}",
                    fee.to_sat(),
                    floor.to_sat(),
                    child_vsize,
                    min_relay
                )));
            }
            Ok(*fee)
        }
    }
}

/// Checks a child fee against the package target and the individual relay minimum.
pub fn verify_child_fee(
    parent: &ParentTransaction,
    child_fee: Amount,
    child_vsize: u64,
    target: &FeeTarget,
    min_relay: FeeRate,
) -> Result<(), String> {
    if child_fee == Amount::ZERO {
        return Err("child pays no fee".to_string());
    }

    if !min_relay.is_met_by(child_fee, child_vsize) {
        return Err(format!(
            "child pays {} sats for {} vB, below the minimum relay fee rate of {}",
            child_fee.to_sat(),
            child_vsize,
            min_relay
        ));
    }

    if let FeeTarget::PackageRate(rate) = target {
        let total_fee = parent.fee + child_fee;
        let total_vsize = parent.vsize + child_vsize;

        if !rate.is_met_by(total_fee, total_vsize) {
            return Err(format!(
                "package pays {} sats for {} vB, below the requested {}",
                total_fee.to_sat(),
                total_vsize,
                rate
            ));
        }
    }

    Ok(())
}
