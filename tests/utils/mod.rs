#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use bitcoin::hashes::Hash;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Transaction, Txid, WPubkeyHash, Witness,
};
use bump_channel_open::errors::WalletError;
use bump_channel_open::types::{FeeRate, OutpointStatus, ParentTransaction, WalletUtxo};
use bump_channel_open::wallet::WalletApi;

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn p2wpkh_script(n: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]))
}

pub fn wallet_utxo(n: u8, value: u64, confirmations: u32) -> WalletUtxo {
    WalletUtxo {
        outpoint: OutPoint::new(txid(n), 0),
        value: Amount::from_sat(value),
        script_pubkey: p2wpkh_script(n),
        confirmations,
        reserved: false,
    }
}

/// Unconfirmed two-output funding transaction: output 0 is the channel, output 1 is wallet
/// change worth `change_value`.
pub fn funding_parent(n: u8, fee: u64, vsize: u64, change_value: u64) -> (ParentTransaction, OutpointStatus) {
    let parent = ParentTransaction {
        txid: txid(n),
        fee: Amount::from_sat(fee),
        vsize,
        output_count: 2,
        confirmations: 0,
    };
    let change = OutpointStatus {
        outpoint: OutPoint::new(txid(n), 1),
        value: Amount::from_sat(change_value),
        script_pubkey: p2wpkh_script(n),
        confirmations: 0,
    };
    (parent, change)
}

#[derive(Default)]
struct State {
    utxos: Vec<WalletUtxo>,
    parents: HashMap<Txid, ParentTransaction>,
    outpoints: HashMap<OutPoint, OutpointStatus>,
    balance: Option<Amount>,
    min_relay: FeeRate,
    locked: HashSet<OutPoint>,
    broadcasts: Vec<Transaction>,
    signing_error: Option<String>,
    broadcast_error: Option<String>,
    change_addresses: u8,
}

/// In-memory wallet and mempool. Broadcast children spend their inputs.
pub struct FakeWallet {
    state: Mutex<State>,
}

impl FakeWallet {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                min_relay: FeeRate::from_sat_per_vb(1.0),
                ..State::default()
            }),
        }
    }

    pub fn with_utxo(self, utxo: WalletUtxo) -> Self {
        self.state.lock().unwrap().utxos.push(utxo);
        self
    }

    pub fn with_parent(self, parent: ParentTransaction, output: OutpointStatus) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.parents.insert(parent.txid, parent);
            state.outpoints.insert(output.outpoint, output);
        }
        self
    }

    /// Reports `balance` instead of the sum of confirmed wallet outputs.
    pub fn with_balance(self, balance: u64) -> Self {
        self.state.lock().unwrap().balance = Some(Amount::from_sat(balance));
        self
    }

    pub fn with_min_relay(self, rate: FeeRate) -> Self {
        self.state.lock().unwrap().min_relay = rate;
        self
    }

    pub fn failing_signing(self, reason: &str) -> Self {
        self.state.lock().unwrap().signing_error = Some(reason.to_string());
        self
    }

    pub fn rejecting_broadcast(self, reason: &str) -> Self {
        self.state.lock().unwrap().broadcast_error = Some(reason.to_string());
        self
    }

    pub fn confirm(&self, txid: &Txid) {
        if let Some(parent) = self.state.lock().unwrap().parents.get_mut(txid) {
            parent.confirmations = 1;
        }
    }

    pub fn locked(&self) -> HashSet<OutPoint> {
        self.state.lock().unwrap().locked.clone()
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcasts.clone()
    }
}

impl WalletApi for FakeWallet {
    fn list_wallet_utxos(&self) -> Result<Vec<WalletUtxo>, WalletError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .utxos
            .iter()
            .cloned()
            .map(|mut utxo| {
                utxo.reserved |= state.locked.contains(&utxo.outpoint);
                utxo
            })
            .collect())
    }

    fn unreserved_balance(&self) -> Result<Amount, WalletError> {
        if let Some(balance) = self.state.lock().unwrap().balance {
            return Ok(balance);
        }

        Ok(self
            .list_wallet_utxos()?
            .iter()
            .filter(|utxo| utxo.confirmations > 0 && !utxo.reserved)
            .map(|utxo| utxo.value)
            .sum())
    }

    fn new_change_address(&self) -> Result<Address, WalletError> {
        let mut state = self.state.lock().unwrap();
        state.change_addresses += 1;
        let script = p2wpkh_script(0xc0 + state.change_addresses);

        Address::from_script(&script, Network::Regtest)
            .map_err(|e| WalletError::Unexpected(e.to_string()))
    }

    fn get_parent_transaction(&self, txid: &Txid) -> Result<Option<ParentTransaction>, WalletError> {
        Ok(self.state.lock().unwrap().parents.get(txid).cloned())
    }

    fn get_outpoint_status(&self, outpoint: &OutPoint) -> Result<Option<OutpointStatus>, WalletError> {
        Ok(self.state.lock().unwrap().outpoints.get(outpoint).cloned())
    }

    fn sign_transaction(&self, tx: &Transaction) -> Result<Transaction, WalletError> {
        if let Some(reason) = &self.state.lock().unwrap().signing_error {
            return Err(WalletError::IncompleteSignature(reason.clone()));
        }

        let mut signed = tx.clone();
        for input in signed.input.iter_mut() {
            input.witness = Witness::from_slice(&[vec![0x30; 71], vec![0x02; 33]]);
        }
        Ok(signed)
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.broadcast_error {
            return Err(WalletError::Unexpected(reason.clone()));
        }

        for input in &tx.input {
            let spent = input.previous_output;
            state.outpoints.remove(&spent);
            state.utxos.retain(|utxo| utxo.outpoint != spent);
            state.locked.remove(&spent);
        }
        state.broadcasts.push(tx.clone());

        Ok(tx.compute_txid())
    }

    fn min_relay_fee_rate(&self) -> Result<FeeRate, WalletError> {
        Ok(self.state.lock().unwrap().min_relay)
    }

    fn lock_inputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        self.state.lock().unwrap().locked.extend(outpoints.iter().copied());
        Ok(())
    }

    fn unlock_inputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        let mut state = self.state.lock().unwrap();
        for outpoint in outpoints {
            state.locked.remove(outpoint);
        }
        Ok(())
    }
}
