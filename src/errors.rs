use bitcoin::{Amount, OutPoint, Txid};
use config as settings;
use thiserror::Error;

use crate::types::BumpOutcome;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Bad configuration: {0}")]
    BadConfig(String),
    #[error("while trying to build configuration")]
    ConfigFileError(#[from] settings::ConfigError),
}

/// Failures reported by the wallet/chain collaborator.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Rpc error: {0}")]
    RpcError(#[from] bitcoincore_rpc::Error),

    #[error("Error while parsing address: {0}")]
    ParsingError(#[from] bitcoin::address::ParseError),

    #[error("Error while decoding transaction: {0}")]
    DecodingError(#[from] bitcoin::consensus::encode::Error),

    #[error("Wallet could not sign every input: {0}")]
    IncompleteSignature(String),

    #[error("Wallet error: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum BumpError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Outpoint {0} not found or already spent")]
    OutpointNotFound(OutPoint),

    #[error("Transaction {0} is already confirmed and cannot be bumped")]
    AlreadyConfirmed(Txid),

    #[error(
        "Insufficient funds: the bump needs {} sats but the parent output and eligible wallet UTXOs only hold {} sats",
        .required.to_sat(),
        .available.to_sat()
    )]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Emergency reserve violation: {0}")]
    ReserveViolation(String),

    #[error("Fee computation failed: {0}")]
    FeeComputationFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Network rejected the transaction: {reason}")]
    BroadcastFailed { reason: String, tx_hex: String },

    #[error("Error with wallet: {0}")]
    WalletError(#[from] WalletError),
}

impl BumpError {
    pub fn outcome(&self) -> BumpOutcome {
        match self {
            BumpError::InvalidRequest(_) => BumpOutcome::InvalidRequest,
            BumpError::OutpointNotFound(_) => BumpOutcome::OutpointNotFound,
            BumpError::AlreadyConfirmed(_) => BumpOutcome::AlreadyConfirmed,
            BumpError::InsufficientFunds { .. } => BumpOutcome::InsufficientFunds,
            BumpError::ReserveViolation(_) => BumpOutcome::ReserveBlocked,
            BumpError::FeeComputationFailed(_) => BumpOutcome::FeeComputationFailed,
            BumpError::SigningFailed(_) => BumpOutcome::SigningFailed,
            BumpError::BroadcastFailed { .. } => BumpOutcome::BroadcastFailed,
            BumpError::WalletError(_) => BumpOutcome::WalletError,
        }
    }
}
