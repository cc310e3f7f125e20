use std::fmt;
use std::str::FromStr;

use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::errors::BumpError;

/// Fee rate in sats per virtual byte, stored with a resolution of 1 sat per 1000 vbytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FeeRate {
    sat_per_kvb: u64,
}

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate { sat_per_kvb: 0 };

    pub fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        Self { sat_per_kvb }
    }

    /// Rounds to the nearest sat/kvB. Negative, NaN and sub-resolution values collapse to zero.
    pub fn from_sat_per_vb(sat_per_vb: f64) -> Self {
        Self {
            sat_per_kvb: (sat_per_vb * 1000.0).round() as u64,
        }
    }

    pub fn to_sat_per_kvb(self) -> u64 {
        self.sat_per_kvb
    }

    pub fn to_sat_per_vb(self) -> f64 {
        self.sat_per_kvb as f64 / 1000.0
    }

    pub fn is_zero(self) -> bool {
        self.sat_per_kvb == 0
    }

    /// Smallest whole-sat fee paying at least this rate for `vsize` vbytes.
    pub fn fee_for_vsize(self, vsize: u64) -> Amount {
        let scaled = self.sat_per_kvb.saturating_mul(vsize);
        Amount::from_sat(scaled.div_ceil(1000))
    }

    /// Whether `fee` over `vsize` vbytes pays at least this rate.
    pub fn is_met_by(self, fee: Amount, vsize: u64) -> bool {
        fee.to_sat().saturating_mul(1000) >= self.sat_per_kvb.saturating_mul(vsize)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.3} sat/vB", self.to_sat_per_vb())
    }
}

/// What the operator asked the child to pay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeTarget {
    /// Combined rate for parent and child, `<n>satvb`.
    PackageRate(FeeRate),
    /// Fixed child fee, `<n>sats`.
    AbsoluteFee(Amount),
}

impl FeeTarget {
    /// Rate at which adding an input or output is priced.
    pub fn marginal_rate(&self, min_relay: FeeRate) -> FeeRate {
        match self {
            FeeTarget::PackageRate(rate) => (*rate).max(min_relay),
            FeeTarget::AbsoluteFee(_) => min_relay,
        }
    }

    pub fn desired_package_rate(&self) -> Option<FeeRate> {
        match self {
            FeeTarget::PackageRate(rate) => Some(*rate),
            FeeTarget::AbsoluteFee(_) => None,
        }
    }
}

impl FromStr for FeeTarget {
    type Err = BumpError;

    fn from_str(amount: &str) -> Result<Self, Self::Err> {
        let amount = amount.trim();

        if let Some(rate) = amount.strip_suffix("satvb") {
            let sat_per_kvb = parse_sat_per_kvb(amount, rate.trim())?;

            if sat_per_kvb == 0 {
                return Err(BumpError::InvalidRequest(format!(
                    "Invalid fee rate '{amount}': must be strictly positive"
                )));
            }

            return Ok(FeeTarget::PackageRate(FeeRate::from_sat_per_kvb(sat_per_kvb)));
        }

        if let Some(fee) = amount.strip_suffix("sats") {
            let fee: u64 = fee.trim().parse().map_err(|_| {
                BumpError::InvalidRequest(format!(
                    "Invalid amount '{amount}': must be a whole number of sats followed by 'sats'"
                ))
            })?;

            return Ok(FeeTarget::AbsoluteFee(Amount::from_sat(fee)));
        }

        Err(BumpError::InvalidRequest(format!(
            "Invalid amount '{amount}': must end with 'sats' or 'satvb'"
        )))
    }
}

/// Parses a plain decimal sat/vB value into sat/kvB without going through floating point.
fn parse_sat_per_kvb(amount: &str, rate: &str) -> Result<u64, BumpError> {
    let malformed = || {
        BumpError::InvalidRequest(format!(
            "Invalid amount '{amount}': must be a valid number followed by 'sats' or 'satvb'"
        ))
    };

    let (whole, fraction) = rate.split_once('.').unwrap_or((rate, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > 3 {
        return Err(BumpError::InvalidRequest(format!(
            "Invalid fee rate '{amount}': finer than 0.001 sat/vB"
        )));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| malformed())?
    };
    let fraction: u64 = format!("{fraction:0<3}").parse().map_err(|_| malformed())?;

    whole
        .checked_mul(1000)
        .and_then(|kvb| kvb.checked_add(fraction))
        .ok_or_else(malformed)
}

/// Bump request as received from the command surface, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct BumpRequest {
    pub txid: String,
    pub vout: i64,
    pub fee: FeeTarget,
    // Broadcast and accept reserve breaches. Falls back to the configured default when unset.
    pub yolo: Option<bool>,
}

impl BumpRequest {
    pub fn new(txid: impl Into<String>, vout: i64, fee: FeeTarget) -> Self {
        Self {
            txid: txid.into(),
            vout,
            fee,
            yolo: None,
        }
    }

    pub fn with_yolo(mut self, yolo: bool) -> Self {
        self.yolo = Some(yolo);
        self
    }

    /// Checks everything that can be checked without asking the wallet.
    pub fn validate(&self, default_yolo: bool) -> Result<ValidatedRequest, BumpError> {
        let txid = self.txid.trim();
        if txid.is_empty() {
            return Err(BumpError::InvalidRequest(
                "Invalid or missing txid: must be a non-empty string".to_string(),
            ));
        }

        let txid = Txid::from_str(txid).map_err(|e| {
            BumpError::InvalidRequest(format!("Invalid txid '{txid}': {e}"))
        })?;

        let vout = u32::try_from(self.vout).map_err(|_| {
            BumpError::InvalidRequest(format!(
                "Invalid vout {}: must be a non-negative integer",
                self.vout
            ))
        })?;

        match self.fee {
            FeeTarget::PackageRate(rate) if rate.is_zero() => {
                return Err(BumpError::InvalidRequest(
                    "Invalid fee rate: must be strictly positive".to_string(),
                ));
            }
            FeeTarget::AbsoluteFee(fee) if fee == Amount::ZERO => {
                return Err(BumpError::InvalidRequest(
                    "Invalid fee: the child must pay a positive fee".to_string(),
                ));
            }
            _ => {}
        }

        Ok(ValidatedRequest {
            outpoint: OutPoint::new(txid, vout),
            fee: self.fee,
            yolo: self.yolo.unwrap_or(default_yolo),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub outpoint: OutPoint,
    pub fee: FeeTarget,
    pub yolo: bool,
}

/// A spendable output as reported by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletUtxo {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub confirmations: u32,
    // Already committed to another operation (locked in the wallet).
    pub reserved: bool,
}

/// The unconfirmed transaction being bumped.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentTransaction {
    pub txid: Txid,
    pub fee: Amount,
    pub vsize: u64,
    pub output_count: u32,
    pub confirmations: u32,
}

impl ParentTransaction {
    pub fn fee_rate(&self) -> f64 {
        ratio(self.fee, self.vsize)
    }
}

/// Current state of an unspent outpoint. Spent or unknown outpoints have no status.
#[derive(Debug, Clone, PartialEq)]
pub struct OutpointStatus {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub confirmations: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BumpOutcome {
    Broadcast,
    Withheld,
    ReserveBlocked,
    InvalidRequest,
    OutpointNotFound,
    AlreadyConfirmed,
    InsufficientFunds,
    FeeComputationFailed,
    SigningFailed,
    BroadcastFailed,
    WalletError,
}

impl BumpOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BumpOutcome::Broadcast | BumpOutcome::Withheld)
    }
}

impl fmt::Display for BumpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            BumpOutcome::Broadcast => "broadcast",
            BumpOutcome::Withheld => "withheld",
            BumpOutcome::ReserveBlocked => "reserve_blocked",
            BumpOutcome::InvalidRequest => "invalid_request",
            BumpOutcome::OutpointNotFound => "outpoint_not_found",
            BumpOutcome::AlreadyConfirmed => "already_confirmed",
            BumpOutcome::InsufficientFunds => "insufficient_funds",
            BumpOutcome::FeeComputationFailed => "fee_computation_failed",
            BumpOutcome::SigningFailed => "signing_failed",
            BumpOutcome::BroadcastFailed => "broadcast_failed",
            BumpOutcome::WalletError => "wallet_error",
        };
        write!(f, "{name}")
    }
}

/// Fee figures of a built child, in sats and sat/vB.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FeeSummary {
    pub parent_fee: u64,
    pub parent_vsize: u64,
    pub parent_feerate: f64,
    pub child_fee: u64,
    pub child_vsize: u64,
    pub child_feerate: f64,
    pub total_fees: u64,
    pub total_vsizes: u64,
    pub total_feerate: f64,
    // Zero when the request asked for a fixed child fee.
    pub desired_total_feerate: f64,
}

impl FeeSummary {
    pub fn new(
        parent: &ParentTransaction,
        child_fee: Amount,
        child_vsize: u64,
        target: &FeeTarget,
    ) -> Self {
        let total_fees = parent.fee + child_fee;
        let total_vsizes = parent.vsize + child_vsize;

        Self {
            parent_fee: parent.fee.to_sat(),
            parent_vsize: parent.vsize,
            parent_feerate: parent.fee_rate(),
            child_fee: child_fee.to_sat(),
            child_vsize,
            child_feerate: ratio(child_fee, child_vsize),
            total_fees: total_fees.to_sat(),
            total_vsizes,
            total_feerate: ratio(total_fees, total_vsizes),
            desired_total_feerate: target
                .desired_package_rate()
                .map(FeeRate::to_sat_per_vb)
                .unwrap_or(0.0),
        }
    }
}

/// Terminal artifact of a bump request.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BumpResult {
    pub outcome: BumpOutcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<FeeSummary>,
    // Inputs left locked in the wallet, to be unlocked if the transaction is never broadcast.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locked_inputs: Vec<OutPoint>,
}

impl BumpResult {
    pub fn from_error(error: &BumpError) -> Self {
        let tx_hex = match error {
            BumpError::BroadcastFailed { tx_hex, .. } => Some(tx_hex.clone()),
            _ => None,
        };
        let warning = match error {
            BumpError::ReserveViolation(warning) => Some(warning.clone()),
            _ => None,
        };

        Self {
            outcome: error.outcome(),
            message: error.to_string(),
            warning,
            tx_hex,
            txid: None,
            fees: None,
            locked_inputs: vec![],
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl From<BumpError> for BumpResult {
    fn from(error: BumpError) -> Self {
        BumpResult::from_error(&error)
    }
}

/// Lower-case hex of the consensus serialization.
pub fn tx_to_hex(tx: &Transaction) -> String {
    hex::encode(bitcoin::consensus::serialize(tx))
}

fn ratio(fee: Amount, vsize: u64) -> f64 {
    if vsize == 0 {
        return 0.0;
    }
    fee.to_sat() as f64 / vsize as f64
}
