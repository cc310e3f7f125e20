use std::collections::HashSet;
use std::path::PathBuf;

use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Transaction, Txid};
use bitcoincore_rpc::json::AddressType;
use bitcoincore_rpc::{jsonrpc, Auth, Client, RpcApi};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::RpcConfig;
use crate::constants::RPC_INVALID_ADDRESS_OR_KEY;
use crate::errors::WalletError;
use crate::types::{FeeRate, OutpointStatus, ParentTransaction, WalletUtxo};
use crate::wallet::WalletApi;

/// [`WalletApi`] backed by a bitcoind node and its loaded wallet.
pub struct BitcoindWallet {
    client: Client,
    network: Network,
}

#[derive(Deserialize)]
struct LockedOutpoint {
    txid: Txid,
    vout: u32,
}

impl BitcoindWallet {
    pub fn new(client: Client, network: Network) -> Self {
        Self { client, network }
    }

    pub fn new_from_config(rpc_config: &RpcConfig) -> Result<Self, WalletError> {
        let auth = match (&rpc_config.username, &rpc_config.password, &rpc_config.cookie_file) {
            (Some(username), Some(password), _) => {
                Auth::UserPass(username.to_string(), password.to_string())
            }
            (_, _, Some(cookie_file)) => Auth::CookieFile(PathBuf::from(cookie_file)),
            _ => {
                return Err(WalletError::Unexpected(
                    "rpc username/password or cookie_file must be configured".to_string(),
                ))
            }
        };

        let endpoint = rpc_config.endpoint();
        info!("Connecting to bitcoind at {}", endpoint);
        let client = Client::new(&endpoint, auth)?;

        Ok(Self::new(client, rpc_config.network))
    }

    fn locked_outpoints(&self) -> Result<HashSet<OutPoint>, WalletError> {
        let locked: Vec<LockedOutpoint> = self.client.call("listlockunspent", &[])?;

        Ok(locked
            .into_iter()
            .map(|locked| OutPoint::new(locked.txid, locked.vout))
            .collect())
    }

    fn confirmed_parent(&self, txid: &Txid) -> Result<Option<ParentTransaction>, WalletError> {
        let wallet_tx = match self.client.get_transaction(txid, Some(true)) {
            Ok(wallet_tx) => wallet_tx,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if wallet_tx.info.confirmations <= 0 {
            // Known to the wallet but neither in the mempool nor in a block.
            debug!("Transaction {} is not in the mempool", txid);
            return Ok(None);
        }

        let tx = wallet_tx.transaction()?;
        let fee = wallet_tx
            .fee
            .map(|fee| fee.unsigned_abs())
            .unwrap_or(Amount::ZERO);

        Ok(Some(ParentTransaction {
            txid: *txid,
            fee,
            vsize: tx.vsize() as u64,
            output_count: tx.output.len() as u32,
            confirmations: wallet_tx.info.confirmations as u32,
        }))
    }
}

impl WalletApi for BitcoindWallet {
    fn list_wallet_utxos(&self) -> Result<Vec<WalletUtxo>, WalletError> {
        let locked = self.locked_outpoints()?;
        let unspent = self.client.list_unspent(Some(0), None, None, None, None)?;

        Ok(unspent
            .into_iter()
            .map(|entry| {
                let outpoint = OutPoint::new(entry.txid, entry.vout);
                WalletUtxo {
                    outpoint,
                    value: entry.amount,
                    script_pubkey: entry.script_pub_key,
                    confirmations: entry.confirmations,
                    reserved: locked.contains(&outpoint) || !entry.spendable,
                }
            })
            .collect())
    }

    fn unreserved_balance(&self) -> Result<Amount, WalletError> {
        Ok(self
            .list_wallet_utxos()?
            .iter()
            .filter(|utxo| utxo.confirmations > 0 && !utxo.reserved)
            .map(|utxo| utxo.value)
            .sum())
    }

    fn new_change_address(&self) -> Result<Address, WalletError> {
        let address = self
            .client
            .get_raw_change_address(Some(AddressType::Bech32))?
            .require_network(self.network)?;

        Ok(address)
    }

    fn get_parent_transaction(
        &self,
        txid: &Txid,
    ) -> Result<Option<ParentTransaction>, WalletError> {
        let entry = match self.client.get_mempool_entry(txid) {
            Ok(entry) => entry,
            Err(e) if is_not_found(&e) => return self.confirmed_parent(txid),
            Err(e) => return Err(e.into()),
        };

        let info = self.client.get_raw_transaction_info(txid, None)?;

        Ok(Some(ParentTransaction {
            txid: *txid,
            fee: entry.fees.base,
            vsize: entry.vsize,
            output_count: info.vout.len() as u32,
            confirmations: info.confirmations.unwrap_or(0),
        }))
    }

    fn get_outpoint_status(
        &self,
        outpoint: &OutPoint,
    ) -> Result<Option<OutpointStatus>, WalletError> {
        let tx_out = self
            .client
            .get_tx_out(&outpoint.txid, outpoint.vout, Some(true))?;

        Ok(tx_out.map(|tx_out| OutpointStatus {
            outpoint: *outpoint,
            value: tx_out.value,
            script_pubkey: ScriptBuf::from_bytes(tx_out.script_pub_key.hex),
            confirmations: tx_out.confirmations,
        }))
    }

    fn sign_transaction(&self, tx: &Transaction) -> Result<Transaction, WalletError> {
        let signed = self.client.sign_raw_transaction_with_wallet(tx, None, None)?;

        if !signed.complete {
            let reasons = signed
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|e| format!("{}:{} {}", e.txid, e.vout, e.error))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(WalletError::IncompleteSignature(reasons));
        }

        Ok(signed.transaction()?)
    }

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        Ok(self.client.send_raw_transaction(tx)?)
    }

    fn min_relay_fee_rate(&self) -> Result<FeeRate, WalletError> {
        // relayfee is reported in BTC/kvB.
        let relay_fee = self.client.get_network_info()?.relay_fee;
        Ok(FeeRate::from_sat_per_kvb(relay_fee.to_sat()))
    }

    fn lock_inputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        if !self.client.lock_unspent(outpoints)? {
            return Err(WalletError::Unexpected(format!(
                "wallet refused to lock {} inputs",
                outpoints.len()
            )));
        }
        Ok(())
    }

    fn unlock_inputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError> {
        if !self.client.unlock_unspent(outpoints)? {
            return Err(WalletError::Unexpected(format!(
                "wallet refused to unlock {} inputs",
                outpoints.len()
            )));
        }
        Ok(())
    }
}

fn is_not_found(error: &bitcoincore_rpc::Error) -> bool {
    matches!(
        error,
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Rpc(e))
            if e.code == RPC_INVALID_ADDRESS_OR_KEY
    )
}
