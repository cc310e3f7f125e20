use bitcoin::{OutPoint, Transaction, Txid};
use console::style;
use tracing::{info, warn};

use crate::errors::BumpError;
use crate::tx_builder::CandidateTransaction;
use crate::types::tx_to_hex;
use crate::wallet::WalletApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastState {
    Built,
    Signed,
    Broadcast(Txid),
    /// Signed and kept back for the operator to publish.
    Withheld,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedChild {
    pub tx: Transaction,
    pub state: BroadcastState,
    /// Inputs still locked in the wallet. Empty once the child is broadcast.
    pub locked_inputs: Vec<OutPoint>,
}

impl FinalizedChild {
    pub fn txid(&self) -> Option<Txid> {
        match self.state {
            BroadcastState::Broadcast(txid) => Some(txid),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        tx_to_hex(&self.tx)
    }
}

/// Signs a built child and either publishes it or withholds it.
pub struct BroadcastController<'a, W: WalletApi> {
    wallet: &'a W,
    state: BroadcastState,
}

impl<'a, W: WalletApi> BroadcastController<'a, W> {
    pub fn new(wallet: &'a W) -> Self {
        Self {
            wallet,
            state: BroadcastState::Built,
        }
    }

    pub fn state(&self) -> BroadcastState {
        self.state
    }

    /// Locks the child's inputs, signs it, and broadcasts it when `broadcast` is set.
    ///
    /// Inputs are unlocked again when signing or broadcasting fails. A withheld child keeps
    /// them locked until it is published or abandoned.
    pub fn finalize(
        &mut self,
        candidate: &CandidateTransaction,
        broadcast: bool,
    ) -> Result<FinalizedChild, BumpError> {
        let outpoints = candidate.outpoints();
        self.wallet.lock_inputs(&outpoints)?;

        let signed = match self.wallet.sign_transaction(&candidate.tx) {
            Ok(signed) => signed,
            Err(e) => {
                self.release(&outpoints);
                return Err(BumpError::SigningFailed(e.to_string()));
            }
        };
        self.transition(BroadcastState::Signed);

        if !broadcast {
            self.transition(BroadcastState::Withheld);
            return Ok(FinalizedChild {
                tx: signed,
                state: self.state,
                locked_inputs: outpoints,
            });
        }

        match self.wallet.broadcast_transaction(&signed) {
            Ok(txid) => {
                self.transition(BroadcastState::Broadcast(txid));
                Ok(FinalizedChild {
                    tx: signed,
                    state: self.state,
                    locked_inputs: vec![],
                })
            }
            Err(e) => {
                self.release(&outpoints);
                Err(BumpError::BroadcastFailed {
                    reason: e.to_string(),
                    tx_hex: tx_to_hex(&signed),
                })
            }
        }
    }

    fn transition(&mut self, next: BroadcastState) {
        info!(
            "{} {:?} -> {:?}",
            style("Child").cyan(),
            self.state,
            style(next).yellow()
        );
        self.state = next;
    }

    // Best effort: a failed unlock leaves the inputs reserved but does not change the outcome.
    fn release(&self, outpoints: &[OutPoint]) {
        if let Err(e) = self.wallet.unlock_inputs(outpoints) {
            warn!("Failed to unlock {} inputs: {}", outpoints.len(), e);
        }
    }
}
