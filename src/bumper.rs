use console::style;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::broadcast::{BroadcastController, BroadcastState};
use crate::coin_selection::{eligible_utxos, input_spend_cost, select_utxos};
use crate::errors::BumpError;
use crate::reserve::{ReserveDecision, ReserveGuard};
use crate::settings::BumpSettings;
use crate::tx_builder::{input_vsize, ChildTxBuilder};
use crate::types::{BumpOutcome, BumpRequest, BumpResult, FeeSummary, FeeTarget};
use crate::wallet::WalletApi;

pub struct ChannelOpenBumper<W>
where
    W: WalletApi,
{
    wallet: W,
    settings: BumpSettings,
}

pub trait ChannelOpenBumperApi {
    /// Runs one bump request to a terminal result. Never panics on bad input.
    fn bump(&self, request: BumpRequest) -> BumpResult;
}

impl<W> ChannelOpenBumper<W>
where
    W: WalletApi,
{
    pub fn new(wallet: W, settings: BumpSettings) -> Self {
        Self { wallet, settings }
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    fn try_bump(&self, request: &BumpRequest) -> Result<BumpResult, BumpError> {
        let request = request.validate(self.settings.yolo)?;
        debug!(
            "Bumping {} with {:?}, yolo: {}",
            request.outpoint, request.fee, request.yolo
        );

        let min_relay = self.wallet.min_relay_fee_rate()?;
        if let FeeTarget::PackageRate(rate) = request.fee {
            if rate < min_relay {
                return Err(BumpError::InvalidRequest(format!(
                    "Fee rate {} is below the minimum relay fee rate of {}",
                    rate, min_relay
                )));
            }
        }

        let outpoint = request.outpoint;
        let parent = self
            .wallet
            .get_parent_transaction(&outpoint.txid)?
            .ok_or(BumpError::OutpointNotFound(outpoint))?;

        if outpoint.vout >= parent.output_count {
            return Err(BumpError::InvalidRequest(format!(
                "vout {} is out of range, transaction {} has {} outputs",
                outpoint.vout, parent.txid, parent.output_count
            )));
        }

        if parent.confirmations > 0 {
            return Err(BumpError::AlreadyConfirmed(parent.txid));
        }

        let parent_output = self
            .wallet
            .get_outpoint_status(&outpoint)?
            .ok_or(BumpError::OutpointNotFound(outpoint))?;

        info!(
            "{} Parent {} pays {} sats for {} vB ({:.2} sat/vB), output {} holds {} sats",
            style("Bumper").green(),
            style(parent.txid).blue(),
            parent.fee.to_sat(),
            parent.vsize,
            parent.fee_rate(),
            outpoint.vout,
            style(parent_output.value.to_sat()).yellow(),
        );

        let utxos = self.wallet.list_wallet_utxos()?;
        let balance = self.wallet.unreserved_balance()?;
        let change_address = self.wallet.new_change_address()?;

        let builder = ChildTxBuilder::new(
            &parent,
            &parent_output,
            request.fee,
            min_relay,
            change_address.script_pubkey(),
            self.settings.max_build_retries,
        );

        let marginal_rate = builder.marginal_rate();
        let candidates = eligible_utxos(&utxos, &outpoint, |utxo| {
            input_spend_cost(input_vsize(&utxo.script_pubkey), marginal_rate)
        });
        debug!("{} of {} wallet UTXOs are eligible", candidates.len(), utxos.len());

        let selection = select_utxos(parent_output.value, candidates, |inputs| {
            builder.required_input_value(inputs)
        })?;
        info!(
            "{} Selected {} wallet inputs worth {} sats",
            style("Bumper").green(),
            style(selection.selected.len()).yellow(),
            style(selection.selected_value().to_sat()).yellow(),
        );
        let candidate = builder.build(selection)?;

        let guard = ReserveGuard::new(balance, self.settings.reserve_threshold, request.yolo);
        let decision = guard.evaluate(candidate.wallet_input_value());
        if let ReserveDecision::Blocked { warning } = decision {
            return Err(BumpError::ReserveViolation(warning));
        }
        let warning = decision.warning().map(str::to_string);

        let mut controller = BroadcastController::new(&self.wallet);
        let child = controller.finalize(&candidate, request.yolo)?;

        let child_vsize = child.tx.vsize() as u64;
        let fees = FeeSummary::new(&parent, candidate.fee, child_vsize, &request.fee);
        let tx_hex = child.to_hex();

        let (outcome, message) = match child.state {
            BroadcastState::Broadcast(txid) => {
                info!("{} Child {} sent", style("Bumper").green(), style(txid).blue());
                (BumpOutcome::Broadcast, "Transaction sent!".to_string())
            }
            _ => (
                BumpOutcome::Withheld,
                format!(
                    "This is beta software and the transaction was not broadcast. Review it and, \
                     when satisfied, publish it with: bitcoin-cli sendrawtransaction {tx_hex}. \
                     Its inputs stay locked in the wallet, release them with lockunspent if \
                     you decide not to broadcast."
                ),
            ),
        };

        Ok(BumpResult {
            outcome,
            message,
            warning,
            tx_hex: Some(tx_hex),
            txid: child.txid(),
            fees: Some(fees),
            locked_inputs: child.locked_inputs,
        })
    }
}

impl<W> ChannelOpenBumperApi for ChannelOpenBumper<W>
where
    W: WalletApi,
{
    fn bump(&self, request: BumpRequest) -> BumpResult {
        let span = info_span!("bump", id = %Uuid::new_v4(), txid = %request.txid, vout = request.vout);
        let _enter = span.enter();

        match self.try_bump(&request) {
            Ok(result) => result,
            Err(e) => {
                error!("{} {}", style("Bump failed:").red(), e);
                BumpResult::from_error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WalletError;
    use crate::types::{FeeRate, OutpointStatus, ParentTransaction, WalletUtxo};
    use crate::wallet::MockWalletApi;
    use bitcoin::hashes::Hash;
    use mockall::predicate::eq;
    use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Transaction, Txid, WPubkeyHash, Witness};

    const PARENT: [u8; 32] = [0xaa; 32];

    fn parent_txid() -> Txid {
        Txid::from_byte_array(PARENT)
    }

    fn p2wpkh(n: u8) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([n; 20]))
    }

    fn change_address() -> Address {
        Address::from_script(&p2wpkh(0xcc), Network::Regtest).unwrap()
    }

    fn parent(confirmations: u32) -> ParentTransaction {
        ParentTransaction {
            txid: parent_txid(),
            fee: Amount::from_sat(500),
            vsize: 110,
            output_count: 2,
            confirmations,
        }
    }

    fn parent_output(value: u64) -> OutpointStatus {
        OutpointStatus {
            outpoint: OutPoint::new(parent_txid(), 1),
            value: Amount::from_sat(value),
            script_pubkey: p2wpkh(0xaa),
            confirmations: 0,
        }
    }

    fn utxo(n: u8, value: u64) -> WalletUtxo {
        WalletUtxo {
            outpoint: OutPoint::new(Txid::from_byte_array([n; 32]), 0),
            value: Amount::from_sat(value),
            script_pubkey: p2wpkh(n),
            confirmations: 6,
            reserved: false,
        }
    }

    fn request(amount: &str) -> BumpRequest {
        BumpRequest::new(parent_txid().to_string(), 1, amount.parse().unwrap())
    }

    fn signed(tx: &Transaction) -> Transaction {
        let mut tx = tx.clone();
        for input in tx.input.iter_mut() {
            input.witness = Witness::from_slice(&[vec![1u8; 71], vec![2u8; 33]]);
        }
        tx
    }

    fn wallet(parent_value: u64, utxos: Vec<WalletUtxo>, balance: u64) -> MockWalletApi {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Ok(FeeRate::from_sat_per_vb(1.0)));
        wallet
            .expect_get_parent_transaction()
            .returning(|_| Ok(Some(parent(0))));
        wallet
            .expect_get_outpoint_status()
            .returning(move |_| Ok(Some(parent_output(parent_value))));
        wallet
            .expect_list_wallet_utxos()
            .returning(move || Ok(utxos.clone()));
        wallet
            .expect_unreserved_balance()
            .returning(move || Ok(Amount::from_sat(balance)));
        wallet
            .expect_new_change_address()
            .returning(|| Ok(change_address()));
        wallet
    }

    #[test]
    fn withheld_by_default() {
        let mut wallet = wallet(10_000, vec![utxo(1, 5_000)], 30_000);
        wallet.expect_lock_inputs().times(1).returning(|_| Ok(()));
        wallet
            .expect_sign_transaction()
            .times(1)
            .returning(|tx| Ok(signed(tx)));
        wallet.expect_broadcast_transaction().never();

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let result = bumper.bump(request("20satvb"));

        assert_eq!(result.outcome, BumpOutcome::Withheld);
        assert!(result.warning.is_none());
        assert!(result.txid.is_none());
        assert_eq!(result.locked_inputs, vec![OutPoint::new(parent_txid(), 1)]);

        let hex = result.tx_hex.unwrap();
        assert!(result.message.contains(&format!("bitcoin-cli sendrawtransaction {hex}")));

        let fees = result.fees.unwrap();
        assert_eq!(fees.child_fee, 3_900);
        assert_eq!(fees.desired_total_feerate, 20.0);
        assert!(fees.total_feerate >= 20.0);
    }

    #[test]
    fn yolo_broadcasts() {
        let mut wallet = wallet(10_000, vec![], 30_000);
        wallet.expect_lock_inputs().returning(|_| Ok(()));
        wallet
            .expect_sign_transaction()
            .returning(|tx| Ok(signed(tx)));
        wallet
            .expect_broadcast_transaction()
            .times(1)
            .returning(|tx| Ok(tx.compute_txid()));

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let result = bumper.bump(request("20satvb").with_yolo(true));

        assert_eq!(result.outcome, BumpOutcome::Broadcast);
        assert_eq!(result.message, "Transaction sent!");
        assert!(result.txid.is_some());
        assert!(result.locked_inputs.is_empty());
    }

    #[test]
    fn configured_yolo_applies_when_request_is_silent() {
        let mut wallet = wallet(10_000, vec![], 30_000);
        wallet.expect_lock_inputs().returning(|_| Ok(()));
        wallet
            .expect_sign_transaction()
            .returning(|tx| Ok(signed(tx)));
        wallet
            .expect_broadcast_transaction()
            .times(1)
            .returning(|tx| Ok(tx.compute_txid()));

        let settings = BumpSettings {
            yolo: true,
            ..BumpSettings::default()
        };
        let bumper = ChannelOpenBumper::new(wallet, settings);

        assert_eq!(bumper.bump(request("20satvb")).outcome, BumpOutcome::Broadcast);
    }

    #[test]
    fn reserve_breach_is_blocked_before_signing() {
        let mut wallet = wallet(3_000, vec![utxo(1, 5_000)], 26_000);
        wallet.expect_lock_inputs().never();
        wallet.expect_sign_transaction().never();

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let result = bumper.bump(request("20satvb"));

        assert_eq!(result.outcome, BumpOutcome::ReserveBlocked);
        assert!(result.message.contains("21000 sats, below 25000 sat emergency reserve"));
        assert!(result.tx_hex.is_none());
    }

    #[test]
    fn reserve_breach_with_yolo_carries_warning() {
        let mut wallet = wallet(3_000, vec![utxo(1, 5_000)], 26_000);
        wallet.expect_lock_inputs().returning(|_| Ok(()));
        wallet
            .expect_sign_transaction()
            .returning(|tx| Ok(signed(tx)));
        wallet
            .expect_broadcast_transaction()
            .returning(|tx| Ok(tx.compute_txid()));

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let result = bumper.bump(request("20satvb").with_yolo(true));

        assert_eq!(result.outcome, BumpOutcome::Broadcast);
        assert_eq!(
            result.warning.as_deref(),
            Some("Bump would leave 21000 sats, below 25000 sat emergency reserve.")
        );
    }

    #[test]
    fn invalid_request_makes_no_wallet_calls() {
        // Any call on an expectation-free mock panics.
        let bumper = ChannelOpenBumper::new(MockWalletApi::new(), BumpSettings::default());

        let zero_rate = BumpRequest::new(
            parent_txid().to_string(),
            1,
            FeeTarget::PackageRate(FeeRate::ZERO),
        );
        assert_eq!(bumper.bump(zero_rate).outcome, BumpOutcome::InvalidRequest);

        let negative_vout = BumpRequest::new(parent_txid().to_string(), -1, "5satvb".parse().unwrap());
        assert_eq!(bumper.bump(negative_vout).outcome, BumpOutcome::InvalidRequest);

        let empty_txid = BumpRequest::new("", 0, "5satvb".parse().unwrap());
        assert_eq!(bumper.bump(empty_txid).outcome, BumpOutcome::InvalidRequest);
    }

    #[test]
    fn rate_below_relay_minimum_is_invalid() {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Ok(FeeRate::from_sat_per_vb(1.0)));
        wallet.expect_get_parent_transaction().never();

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());

        assert_eq!(
            bumper.bump(request("0.5satvb")).outcome,
            BumpOutcome::InvalidRequest
        );
    }

    #[test]
    fn unknown_parent_is_not_found() {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Ok(FeeRate::from_sat_per_vb(1.0)));
        wallet
            .expect_get_parent_transaction()
            .with(eq(parent_txid()))
            .times(1)
            .returning(|_| Ok(None));
        wallet.expect_get_outpoint_status().never();

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());

        assert_eq!(
            bumper.bump(request("5satvb")).outcome,
            BumpOutcome::OutpointNotFound
        );
    }

    #[test]
    fn vout_out_of_range_is_invalid() {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Ok(FeeRate::from_sat_per_vb(1.0)));
        wallet
            .expect_get_parent_transaction()
            .returning(|_| Ok(Some(parent(0))));
        wallet.expect_get_outpoint_status().never();

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let request = BumpRequest::new(parent_txid().to_string(), 2, "5satvb".parse().unwrap());

        assert_eq!(bumper.bump(request).outcome, BumpOutcome::InvalidRequest);
    }

    #[test]
    fn confirmed_parent_cannot_be_bumped() {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Ok(FeeRate::from_sat_per_vb(1.0)));
        wallet
            .expect_get_parent_transaction()
            .returning(|_| Ok(Some(parent(3))));

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let result = bumper.bump(request("5satvb"));

        assert_eq!(result.outcome, BumpOutcome::AlreadyConfirmed);
        assert!(result.message.contains("already confirmed and cannot be bumped"));
    }

    #[test]
    fn spent_outpoint_is_not_found() {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Ok(FeeRate::from_sat_per_vb(1.0)));
        wallet
            .expect_get_parent_transaction()
            .returning(|_| Ok(Some(parent(0))));
        wallet.expect_get_outpoint_status().returning(|_| Ok(None));

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());

        assert_eq!(
            bumper.bump(request("5satvb")).outcome,
            BumpOutcome::OutpointNotFound
        );
    }

    #[test]
    fn insufficient_funds() {
        let mut wallet = wallet(1_000, vec![utxo(1, 1_500)], 30_000);
        wallet.expect_lock_inputs().never();

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());

        assert_eq!(
            bumper.bump(request("50satvb")).outcome,
            BumpOutcome::InsufficientFunds
        );
    }

    #[test]
    fn wallet_failure_is_reported() {
        let mut wallet = MockWalletApi::new();
        wallet
            .expect_min_relay_fee_rate()
            .returning(|| Err(WalletError::Unexpected("connection refused".to_string())));

        let bumper = ChannelOpenBumper::new(wallet, BumpSettings::default());
        let result = bumper.bump(request("5satvb"));

        assert_eq!(result.outcome, BumpOutcome::WalletError);
        assert!(result.message.contains("connection refused"));
    }
}
