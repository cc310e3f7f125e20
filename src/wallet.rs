use bitcoin::{Address, Amount, OutPoint, Transaction, Txid};

use crate::errors::WalletError;
use crate::types::{FeeRate, OutpointStatus, ParentTransaction, WalletUtxo};

/// Wallet and chain queries a bump needs. Every call may fail with a [`WalletError`].
#[cfg_attr(test, mockall::automock)]
pub trait WalletApi {
    /// Every wallet output, spent-in-mempool excluded, with its confirmation count and lock
    /// status.
    fn list_wallet_utxos(&self) -> Result<Vec<WalletUtxo>, WalletError>;

    /// Confirmed balance not committed to other operations.
    fn unreserved_balance(&self) -> Result<Amount, WalletError>;

    fn new_change_address(&self) -> Result<Address, WalletError>;

    /// `None` when the node does not know the transaction.
    fn get_parent_transaction(&self, txid: &Txid)
        -> Result<Option<ParentTransaction>, WalletError>;

    /// `None` when the outpoint does not exist or is already spent.
    fn get_outpoint_status(&self, outpoint: &OutPoint)
        -> Result<Option<OutpointStatus>, WalletError>;

    fn sign_transaction(&self, tx: &Transaction) -> Result<Transaction, WalletError>;

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<Txid, WalletError>;

    fn min_relay_fee_rate(&self) -> Result<FeeRate, WalletError>;

    /// Marks outpoints as reserved so no other operation spends them.
    fn lock_inputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError>;

    fn unlock_inputs(&self, outpoints: &[OutPoint]) -> Result<(), WalletError>;
}
