//! Node configuration loaded from an optional TOML file

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::blockchain::pow::{MINING_DIFFICULTY, MINING_REWARD};
use crate::blockchain::LedgerConfig;
use crate::network::DiscoveryRange;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("couldn't parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub mining: MiningConfig,
    pub ledger: LedgerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface the HTTP server binds to
    pub bind_address: String,
    pub port: u16,
    /// Address advertised to peers; detected when unset
    pub host: Option<String>,
    pub peer_port_start: u16,
    pub peer_port_end: u16,
    pub host_offset_start: u8,
    pub host_offset_end: u8,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub sync_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 3333,
            host: None,
            peer_port_start: 3333,
            peer_port_end: 3336,
            host_offset_start: 0,
            host_offset_end: 3,
            probe_timeout_ms: 1_000,
            request_timeout_ms: 5_000,
            sync_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Reward payee; a fresh wallet is generated when unset
    pub miner_address: Option<String>,
    pub difficulty: usize,
    pub reward: f64,
    pub threads: usize,
    pub interval_secs: u64,
    /// Start the periodic mining loop at boot
    pub auto_mine: bool,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            miner_address: None,
            difficulty: MINING_DIFFICULTY,
            reward: MINING_REWARD,
            threads: 1,
            interval_secs: 20,
            auto_mine: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Reject transfers that exceed the sender's committed balance
    pub enforce_balance_check: bool,
}

impl NodeConfig {
    /// Reads the TOML file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mining.difficulty > 64 {
            return Err(ConfigError::Invalid(
                "mining.difficulty cannot exceed 64 hex digits".to_string(),
            ));
        }
        if self.mining.threads == 0 {
            return Err(ConfigError::Invalid("mining.threads must be at least 1".to_string()));
        }
        if self.mining.interval_secs == 0 || self.network.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid("intervals must be positive".to_string()));
        }
        if self.network.peer_port_start > self.network.peer_port_end {
            return Err(ConfigError::Invalid(
                "network.peer_port_start is after network.peer_port_end".to_string(),
            ));
        }
        if self.network.host_offset_start > self.network.host_offset_end {
            return Err(ConfigError::Invalid(
                "network.host_offset_start is after network.host_offset_end".to_string(),
            ));
        }
        Ok(())
    }

    pub fn discovery_range(&self) -> DiscoveryRange {
        DiscoveryRange {
            host_offsets: self.network.host_offset_start..=self.network.host_offset_end,
            ports: self.network.peer_port_start..=self.network.peer_port_end,
        }
    }

    pub fn ledger_config(&self, miner_address: impl Into<String>) -> LedgerConfig {
        LedgerConfig {
            miner_address: miner_address.into(),
            difficulty: self.mining.difficulty,
            mining_reward: self.mining.reward,
            mining_threads: self.mining.threads,
            enforce_balance_check: self.ledger.enforce_balance_check,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.network.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.network.request_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.network.sync_interval_secs)
    }

    pub fn mining_interval(&self) -> Duration {
        Duration::from_secs(self.mining.interval_secs)
    }
}
