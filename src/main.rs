use anyhow::{Context, Result};
use bump_channel_open::bitcoind_wallet::BitcoindWallet;
use bump_channel_open::bumper::{ChannelOpenBumper, ChannelOpenBumperApi};
use bump_channel_open::config::Config;
use bump_channel_open::settings::BumpSettings;
use bump_channel_open::types::{BumpRequest, BumpResult, FeeTarget};
use clap::Parser;
use console::style;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    name = "bump-channel-open",
    about = "Bump the fee of an unconfirmed channel open with a child transaction",
    version
)]
pub struct Cli {
    /// Txid of the unconfirmed funding transaction
    txid: String,
    /// Index of the funding transaction output the wallet controls
    #[clap(allow_hyphen_values = true)]
    vout: i64,
    /// Package fee rate as `<n>satvb` or fixed child fee as `<n>sats`
    amount: String,
    #[clap(long, conflicts_with = "no_yolo")]
    /// Broadcast the child and accept an emergency reserve breach
    yolo: bool,
    #[clap(long)]
    /// Withhold the child even if the configuration enables yolo
    no_yolo: bool,
}

impl Cli {
    fn yolo(&self) -> Option<bool> {
        match (self.yolo, self.no_yolo) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_writer(std::io::stderr)
        .init();

    if let Some(notice) = config.environment_notice() {
        warn!("{}", notice);
    }

    let result = match cli.amount.parse::<FeeTarget>() {
        Ok(fee) => {
            let wallet = BitcoindWallet::new_from_config(&config.rpc)
                .context("Error connecting to bitcoind")?;
            let bumper = ChannelOpenBumper::new(wallet, BumpSettings::from(&config.bump));

            let mut request = BumpRequest::new(cli.txid.clone(), cli.vout, fee);
            if let Some(yolo) = cli.yolo() {
                request = request.with_yolo(yolo);
            }

            info!(
                "{} Bumping {}:{} to {}",
                style("Bump").cyan(),
                style(&cli.txid).blue(),
                cli.vout,
                style(&cli.amount).yellow()
            );
            bumper.bump(request)
        }
        Err(e) => BumpResult::from_error(&e),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.is_success() {
        std::process::exit(1);
    }

    Ok(())
}
