//! Client configuration, loaded from a JSON file.

use fhe_quest_protocol::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Sepolia chain id (0xaa36a7).
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestConfig {
    /// Address of the deployed treasure-hunt contract.
    pub contract_address: Address,
    /// Chain the wallet must be on.
    pub target_chain_id: u64,
    /// Local fallback bound for an oracle answer, measured from confirmation.
    pub fallback_timeout_ms: u64,
    /// Safety-net poll of game and player stats.
    pub refresh_interval_ms: u64,
    /// Local countdown granularity.
    pub countdown_tick_ms: u64,
    pub search_gas_limit: u64,
    pub create_gas_limit: u64,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self {
            contract_address: Address::zero(),
            target_chain_id: SEPOLIA_CHAIN_ID,
            fallback_timeout_ms: 10_000,
            refresh_interval_ms: 10_000,
            countdown_tick_ms: 1_000,
            search_gas_limit: 500_000,
            create_gas_limit: 1_000_000,
        }
    }
}

impl QuestConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms.max(1))
    }
}
