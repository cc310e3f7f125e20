#![allow(clippy::needless_return)]

pub mod bitcoind_wallet;
pub mod broadcast;
pub mod bumper;
pub mod coin_selection;
pub mod config;
pub mod constants;
pub mod errors;
pub mod fee_model;
pub mod reserve;
pub mod settings;
pub mod tx_builder;
pub mod types;
pub mod wallet;
