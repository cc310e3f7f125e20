use bitcoin::{
    absolute, transaction, Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};
use console::style;
use tracing::{debug, info, warn};

use crate::coin_selection::{total_value, Selection};
use crate::constants::{
    BASE_INPUT_WEIGHT, EMPTY_SCRIPT_SIG_WEIGHT, P2PKH_SCRIPT_SIG_WEIGHT,
    P2SH_P2WPKH_SCRIPT_SIG_WEIGHT, P2TR_KEY_PATH_WITNESS_WEIGHT, P2WPKH_WITNESS_WEIGHT,
    SEGWIT_MARKER_FLAG_WEIGHT,
};
use crate::errors::BumpError;
use crate::fee_model;
use crate::types::{tx_to_hex, FeeRate, FeeTarget, OutpointStatus, ParentTransaction, WalletUtxo};

/// Upper-bound weight of the script_sig and witness needed to spend `script_pubkey`, lengths
/// included.
pub fn satisfaction_weight(script_pubkey: &Script) -> u64 {
    if script_pubkey.is_p2wpkh() {
        EMPTY_SCRIPT_SIG_WEIGHT + P2WPKH_WITNESS_WEIGHT
    } else if script_pubkey.is_p2tr() {
        EMPTY_SCRIPT_SIG_WEIGHT + P2TR_KEY_PATH_WITNESS_WEIGHT
    } else if script_pubkey.is_p2sh() {
        // Wallet P2SH outputs are nested P2WPKH.
        P2SH_P2WPKH_SCRIPT_SIG_WEIGHT + P2WPKH_WITNESS_WEIGHT
    } else {
        // Legacy spend, plus the empty witness it needs inside a segwit transaction.
        P2PKH_SCRIPT_SIG_WEIGHT + 1
    }
}

/// Virtual size added by spending an output locked to `script_pubkey`.
pub fn input_vsize(script_pubkey: &Script) -> u64 {
    (BASE_INPUT_WEIGHT + satisfaction_weight(script_pubkey)).div_ceil(4)
}

/// Virtual size of `tx` once every input is satisfied.
///
/// `tx` is expected unsigned, with empty script_sigs and witnesses.
pub fn estimated_vsize(tx: &Transaction, prevouts: &[TxOut]) -> u64 {
    let unsigned_weight = tx.weight().to_wu();
    let satisfaction: u64 = prevouts
        .iter()
        .map(|prevout| satisfaction_weight(&prevout.script_pubkey))
        .sum();
    // The unsigned weight already counts one empty script_sig length byte per input.
    let empty_script_sigs = EMPTY_SCRIPT_SIG_WEIGHT * tx.input.len() as u64;

    (unsigned_weight - empty_script_sigs + SEGWIT_MARKER_FLAG_WEIGHT + satisfaction).div_ceil(4)
}

/// Smallest change worth creating: above the relay dust limit and above the cost of spending
/// it later at `rate`.
pub fn dust_threshold(change_script: &Script, rate: FeeRate) -> Amount {
    change_script
        .minimal_non_dust()
        .max(rate.fee_for_vsize(input_vsize(change_script)))
}

/// A fully assembled, unsigned child transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTransaction {
    pub tx: Transaction,
    // Outputs spent by `tx`, in input order. The parent output comes first.
    pub prevouts: Vec<TxOut>,
    pub wallet_inputs: Vec<WalletUtxo>,
    pub vsize: u64,
    pub fee: Amount,
}

impl CandidateTransaction {
    pub fn input_value(&self) -> Amount {
        self.prevouts.iter().map(|prevout| prevout.value).sum()
    }

    pub fn output_value(&self) -> Amount {
        self.tx.output.iter().map(|output| output.value).sum()
    }

    pub fn wallet_input_value(&self) -> Amount {
        total_value(&self.wallet_inputs)
    }

    pub fn change(&self) -> Amount {
        self.output_value()
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee.to_sat() as f64 / self.vsize as f64
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.tx.input.iter().map(|input| input.previous_output).collect()
    }

    /// Inputs minus outputs is exactly the fee.
    pub fn is_balanced(&self) -> bool {
        self.input_value().checked_sub(self.output_value()) == Some(self.fee)
    }

    pub fn to_hex(&self) -> String {
        tx_to_hex(&self.tx)
    }
}

enum Assembly {
    Ready(CandidateTransaction),
    Shortfall { needed: Amount, available: Amount },
    Unverified(String),
}

/// Assembles the child spending the parent output plus wallet inputs into one change output.
pub struct ChildTxBuilder<'a> {
    parent: &'a ParentTransaction,
    parent_output: &'a OutpointStatus,
    target: FeeTarget,
    min_relay: FeeRate,
    change_script: ScriptBuf,
    max_retries: u32,
}

impl<'a> ChildTxBuilder<'a> {
    pub fn new(
        parent: &'a ParentTransaction,
        parent_output: &'a OutpointStatus,
        target: FeeTarget,
        min_relay: FeeRate,
        change_script: ScriptBuf,
        max_retries: u32,
    ) -> Self {
        Self {
            parent,
            parent_output,
            target,
            min_relay,
            change_script,
            max_retries,
        }
    }

    /// Rate at which an extra input or the change output is priced.
    pub fn marginal_rate(&self) -> FeeRate {
        self.target.marginal_rate(self.min_relay)
    }

    pub fn dust_threshold(&self) -> Amount {
        dust_threshold(&self.change_script, self.marginal_rate())
    }

    /// Virtual size of the child spending the parent output and `wallet_inputs`.
    pub fn estimate_vsize(&self, wallet_inputs: &[WalletUtxo]) -> u64 {
        let (tx, prevouts) = self.transaction(wallet_inputs, Amount::ZERO);
        estimated_vsize(&tx, &prevouts)
    }

    /// Total input value the child needs with `wallet_inputs`: its fee and a change output
    /// above dust.
    pub fn required_input_value(&self, wallet_inputs: &[WalletUtxo]) -> Result<Amount, BumpError> {
        let vsize = self.estimate_vsize(wallet_inputs);
        let fee = self.child_fee(vsize, wallet_inputs)?;
        Ok(fee + self.dust_threshold())
    }

    // A fixed fee too small for the parent-only child is a bad request. Once wallet inputs
    // are needed it is a fee the child cannot be built with.
    fn child_fee(&self, vsize: u64, wallet_inputs: &[WalletUtxo]) -> Result<Amount, BumpError> {
        let result = fee_model::required_child_fee(self.parent, vsize, &self.target, self.min_relay);

        match (result, &self.target) {
            (Err(BumpError::InvalidRequest(_)), FeeTarget::AbsoluteFee(fee))
                if !wallet_inputs.is_empty() =>
            {
                Err(BumpError::FeeComputationFailed(format!(
                    "fixed child fee of {} sats cannot relay a {} vB child spending {} wallet inputs at {}",
                    fee.to_sat(),
                    vsize,
                    wallet_inputs.len(),
                    self.min_relay
                )))
            }
            (result, _) => result,
        }
    }

    /// Builds the child from `selection`, adding the next remaining input whenever the
    /// assembled transaction falls short.
    pub fn build(&self, selection: Selection) -> Result<CandidateTransaction, BumpError> {
        let Selection {
            mut selected,
            remaining,
        } = selection;
        let mut fallback = remaining.into_iter().peekable();

        for attempt in 0..=self.max_retries {
            let shortfall = match self.assemble(&selected)? {
                Assembly::Ready(candidate) => {
                    info!(
                        "{} Child spends {} inputs, pays {} sats for {} vB, change {} sats",
                        style("Builder").green(),
                        style(candidate.tx.input.len()).yellow(),
                        style(candidate.fee.to_sat()).yellow(),
                        style(candidate.vsize).yellow(),
                        style(candidate.change().to_sat()).yellow(),
                    );
                    return Ok(candidate);
                }
                Assembly::Shortfall { needed, available } => {
                    warn!(
                        "Attempt {}: child needs {} sats but inputs hold {} sats",
                        attempt,
                        needed.to_sat(),
                        available.to_sat()
                    );
                    BumpError::InsufficientFunds {
                        required: needed,
                        available,
                    }
                }
                Assembly::Unverified(reason) => {
                    warn!("Attempt {}: {}", attempt, reason);
                    BumpError::FeeComputationFailed(reason)
                }
            };

            if fallback.peek().is_none() {
                return Err(shortfall);
            }
            if attempt == self.max_retries {
                break;
            }
            if let Some(utxo) = fallback.next() {
                debug!("Adding wallet input {} ({} sats)", utxo.outpoint, utxo.value.to_sat());
                selected.push(utxo);
            }
        }

        Err(BumpError::FeeComputationFailed(format!(
            "child could not meet the requested fee after {} retries with {} wallet inputs",
            self.max_retries,
            selected.len()
        )))
    }

    fn assemble(&self, wallet_inputs: &[WalletUtxo]) -> Result<Assembly, BumpError> {
        let estimate = self.estimate_vsize(wallet_inputs);
        let fee = self.child_fee(estimate, wallet_inputs)?;

        let available = self.parent_output.value + total_value(wallet_inputs);
        let needed = fee + self.dust_threshold();

        if available < needed {
            return Ok(Assembly::Shortfall { needed, available });
        }

        let change = available - fee;
        let (tx, prevouts) = self.transaction(wallet_inputs, change);
        let vsize = estimated_vsize(&tx, &prevouts);

        if let Err(reason) =
            fee_model::verify_child_fee(self.parent, fee, vsize, &self.target, self.min_relay)
        {
            return Ok(Assembly::Unverified(reason));
        }

        let candidate = CandidateTransaction {
            tx,
            prevouts,
            wallet_inputs: wallet_inputs.to_vec(),
            vsize,
            fee,
        };

        if !candidate.is_balanced() {
            return Ok(Assembly::Unverified(format!(
                "inputs {} sats minus outputs {} sats differ from fee {} sats",
                candidate.input_value().to_sat(),
                candidate.output_value().to_sat(),
                fee.to_sat()
            )));
        }

        Ok(Assembly::Ready(candidate))
    }

    fn transaction(&self, wallet_inputs: &[WalletUtxo], change: Amount) -> (Transaction, Vec<TxOut>) {
        let mut inputs = vec![unsigned_input(self.parent_output.outpoint)];
        let mut prevouts = vec![TxOut {
            value: self.parent_output.value,
            script_pubkey: self.parent_output.script_pubkey.clone(),
        }];

        for utxo in wallet_inputs {
            inputs.push(unsigned_input(utxo.outpoint));
            prevouts.push(TxOut {
                value: utxo.value,
                script_pubkey: utxo.script_pubkey.clone(),
            });
        }

        let tx = Transaction {
            version: transaction::Version::TWO,  // Post BIP-68.
            lock_time: absolute::LockTime::ZERO, // Ignore the locktime.
            input: inputs,                       // Parent output goes into index 0.
            output: vec![TxOut {
                value: change,
                script_pubkey: self.change_script.clone(),
            }],
        };

        (tx, prevouts)
    }
}

fn unsigned_input(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::default(), // Filled in by the wallet when signing.
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::default(),
    }
}
