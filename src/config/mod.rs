use std::{fs, path::Path};

use fundme_core::units::NATIVE_UNIT;
use fundme_core::NativeAmount;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NETWORK: &str = "hardhat";

/// Decimal scale of the mock ETH/USD feed.
pub const DECIMALS: u8 = 8;

/// 2000 USD per native unit at [`DECIMALS`].
pub const INITIAL_ANSWER: i128 = 200_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),
    #[error("network `{0}` is not a development chain; the local devnet cannot host it")]
    NotDevelopment(String),
    #[error("network `{0}` defines no development accounts")]
    NoAccounts(String),
    #[error("invalid devnet seed: {0}")]
    Seed(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockFeedConfig {
    pub decimals: u8,
    pub initial_answer: i128,
}

impl Default for MockFeedConfig {
    fn default() -> Self {
        Self {
            decimals: DECIMALS,
            initial_answer: INITIAL_ANSWER,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    #[serde(default)]
    pub development: bool,
    #[serde(default = "defaults::gas_price")]
    pub gas_price: u128,
    #[serde(default = "defaults::accounts")]
    pub accounts: u32,
    #[serde(default = "defaults::initial_balance")]
    pub initial_balance: NativeAmount,
    /// 32-byte hex seed for the deterministic development accounts.
    #[serde(default = "defaults::seed")]
    pub seed: String,
    #[serde(default)]
    pub feed: MockFeedConfig,
}

impl NetworkConfig {
    fn development(name: &str, chain_id: u64) -> Self {
        Self {
            name: name.to_string(),
            chain_id,
            development: true,
            gas_price: defaults::gas_price(),
            accounts: defaults::accounts(),
            initial_balance: defaults::initial_balance(),
            seed: defaults::seed(),
            feed: MockFeedConfig::default(),
        }
    }

    /// Fails unless this network can be hosted by the local devnet.
    pub fn ensure_development(&self) -> Result<(), ConfigError> {
        if !self.development {
            return Err(ConfigError::NotDevelopment(self.name.clone()));
        }
        Ok(())
    }

    pub fn seed_bytes(&self) -> Result<[u8; 32], ConfigError> {
        let bytes = hex::decode(self.seed.trim()).map_err(|e| ConfigError::Seed(e.to_string()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| ConfigError::Seed(format!("expected 32 bytes, got {}", bytes.len())))
    }
}

mod defaults {
    use super::*;

    pub fn gas_price() -> u128 {
        1_000_000_000
    }

    pub fn accounts() -> u32 {
        10
    }

    pub fn initial_balance() -> NativeAmount {
        10_000 * NATIVE_UNIT
    }

    pub fn seed() -> String {
        hex::encode([0x5eu8; 32])
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

impl Config {
    /// Networks known without any config file.
    pub fn builtin() -> Self {
        Self {
            networks: vec![
                NetworkConfig::development("hardhat", 31337),
                NetworkConfig::development("localhost", 31337),
                NetworkConfig {
                    development: false,
                    ..NetworkConfig::development("goerli", 5)
                },
            ],
        }
    }

    /// Built-in networks, overridden and extended by `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::builtin();
        if let Some(path) = path {
            let bytes = fs::read(path)?;
            let file: Config = serde_json::from_slice(&bytes)?;
            config.merge(file);
        }
        Ok(config)
    }

    fn merge(&mut self, other: Config) {
        for network in other.networks {
            match self.networks.iter_mut().find(|n| n.name == network.name) {
                Some(existing) => *existing = network,
                None => self.networks.push(network),
            }
        }
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig, ConfigError> {
        self.networks
            .iter()
            .find(|n| n.name == name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }
}
