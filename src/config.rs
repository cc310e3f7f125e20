use std::env;

use bitcoin::Network;
use config as settings;
use serde::Deserialize;

use crate::constants::MAX_BUILD_RETRIES;
use crate::errors::ConfigError;

static DEFAULT_ENV: &str = "development";
static CONFIG_PATH: &str = "config";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)] // enforce strict field compliance
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub bump: BumpConfig,
    pub log_level: Option<String>,
    // BUMP_ENV the file was picked by, None when the default was used.
    #[serde(skip)]
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    // Used when no username/password pair is configured, e.g. ~/.bitcoin/regtest/.cookie
    pub cookie_file: Option<String>,
    pub network: Network,
    // Loaded bitcoind wallet to talk to, required when the node has more than one.
    pub wallet: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BumpConfig {
    // Broadcast automatically and accept emergency reserve breaches when the request does not say.
    #[serde(default)]
    pub yolo: bool,
    #[serde(default = "default_max_build_retries")]
    pub max_build_retries: u32,
}

fn default_max_build_retries() -> u32 {
    MAX_BUILD_RETRIES
}

impl Default for BumpConfig {
    fn default() -> Self {
        Self {
            yolo: false,
            max_build_retries: MAX_BUILD_RETRIES,
        }
    }
}

impl RpcConfig {
    /// Endpoint to connect to, scoped to the configured wallet if any.
    pub fn endpoint(&self) -> String {
        match &self.wallet {
            Some(wallet) => format!("{}/wallet/{}", self.url.trim_end_matches('/'), wallet),
            None => self.url.clone(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        let environment = env::var("BUMP_ENV").ok();
        let env = environment
            .clone()
            .unwrap_or_else(|| DEFAULT_ENV.to_string());

        let mut config = Config::parse_config(env)?;
        config.environment = environment;
        Ok(config)
    }

    /// Warning to log once logging is up, if the default environment was used.
    pub fn environment_notice(&self) -> Option<String> {
        match self.environment {
            Some(_) => None,
            None => Some(format!(
                "BUMP_ENV not set. Using default environment: {}",
                DEFAULT_ENV
            )),
        }
    }

    fn parse_config(env: String) -> Result<Config, ConfigError> {
        let config_path = format!("{}/{}.yaml", CONFIG_PATH, env);

        let settings = settings::Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(ConfigError::ConfigFileError)?;

        let config = settings
            .try_deserialize::<Config>()
            .map_err(ConfigError::ConfigFileError)?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let has_user_pass = self.rpc.username.is_some() && self.rpc.password.is_some();

        if !has_user_pass && self.rpc.cookie_file.is_none() {
            return Err(ConfigError::BadConfig(
                "rpc needs either username and password or a cookie_file".to_string(),
            ));
        }

        if self.rpc.username.is_some() != self.rpc.password.is_some() {
            return Err(ConfigError::BadConfig(
                "rpc username and password must be set together".to_string(),
            ));
        }

        Ok(())
    }
}
