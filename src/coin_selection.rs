//! Selection of additional wallet inputs for a child transaction.
//!
//! Candidates are confirmed, unreserved wallet outputs worth more than it costs to spend them,
//! ordered by descending value. Selection walks that order and stops as soon as the running
//! total covers the requirement, which yields the fewest inputs for the requirement.

use bitcoin::{Amount, OutPoint};
use tracing::{debug, trace};

use crate::errors::BumpError;
use crate::types::{FeeRate, WalletUtxo};

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Inputs to add next to the parent output, largest first.
    pub selected: Vec<WalletUtxo>,
    /// Eligible inputs left over, in the order they would be added.
    pub remaining: Vec<WalletUtxo>,
}

impl Selection {
    pub fn selected_value(&self) -> Amount {
        total_value(&self.selected)
    }
}

pub fn total_value(utxos: &[WalletUtxo]) -> Amount {
    utxos.iter().map(|utxo| utxo.value).sum()
}

/// Filters `utxos` down to what may fund a bump and sorts it in selection order.
///
/// `spend_cost` prices a single additional input at the marginal rate; outputs not worth more
/// than that would only lower the total once added.
pub fn eligible_utxos<F>(
    utxos: &[WalletUtxo],
    parent_outpoint: &OutPoint,
    spend_cost: F,
) -> Vec<WalletUtxo>
where
    F: Fn(&WalletUtxo) -> Amount,
{
    let mut eligible: Vec<WalletUtxo> = utxos
        .iter()
        .filter(|utxo| {
            if utxo.outpoint == *parent_outpoint {
                return false;
            }
            if utxo.reserved {
                trace!("Skipping reserved UTXO {}", utxo.outpoint);
                return false;
            }
            if utxo.confirmations == 0 {
                trace!("Skipping unconfirmed UTXO {}", utxo.outpoint);
                return false;
            }
            if utxo.value <= spend_cost(utxo) {
                trace!("Skipping UTXO {} due to dust proximity after spend", utxo.outpoint);
                return false;
            }
            true
        })
        .cloned()
        .collect();

    // Largest first, outpoint as a stable tie-break.
    eligible.sort_by(|a, b| b.value.cmp(&a.value).then(a.outpoint.cmp(&b.outpoint)));
    eligible
}

/// Picks the shortest prefix of `candidates` such that `base` plus the prefix value covers
/// `required(prefix)`.
///
/// `required` returns the total input value a child with the parent plus the given additional
/// inputs needs: its fee and the smallest change output worth creating.
pub fn select_utxos<F>(
    base: Amount,
    candidates: Vec<WalletUtxo>,
    required: F,
) -> Result<Selection, BumpError>
where
    F: Fn(&[WalletUtxo]) -> Result<Amount, BumpError>,
{
    let mut selected: Vec<WalletUtxo> = Vec::new();
    let mut remaining = candidates.into_iter();
    let mut available = base;

    loop {
        let needed = required(selected.as_slice())?;

        debug!(
            "Selection with {} wallet inputs holds {} sats, needs {} sats",
            selected.len(),
            available.to_sat(),
            needed.to_sat()
        );

        if available >= needed {
            return Ok(Selection {
                selected,
                remaining: remaining.collect(),
            });
        }

        match remaining.next() {
            Some(utxo) => {
                available += utxo.value;
                selected.push(utxo);
            }
            None => {
                return Err(BumpError::InsufficientFunds {
                    required: needed,
                    available,
                })
            }
        }
    }
}

/// Cost of spending an input of `input_vsize` vbytes at `rate`.
pub fn input_spend_cost(input_vsize: u64, rate: FeeRate) -> Amount {
    rate.fee_for_vsize(input_vsize)
}
