//! Configuration for the token ledger

use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Seed from which the factory address is derived
    pub factory_seed: String,

    /// Actor mailbox capacity (backpressure bound)
    pub mailbox_capacity: usize,

    /// Persistence configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "token-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            factory_seed: "token-factory".to_string(),
            mailbox_capacity: 1000,
            storage: StorageConfig::default(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Persist commits to RocksDB; in-memory only when false
    pub enabled: bool,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: PathBuf::from("./data/tokens"),
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,       // 64 MB
            max_write_buffer_number: 4,
            target_file_size_mb: 64,        // 64 MB
            max_background_jobs: 2,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("TOKEN_LEDGER_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
            config.storage.enabled = true;
        }

        if let Ok(persist) = std::env::var("TOKEN_LEDGER_PERSIST") {
            config.storage.enabled = persist.parse().map_err(|_| {
                crate::Error::Config(format!("TOKEN_LEDGER_PERSIST: not a bool: {}", persist))
            })?;
        }

        if let Ok(capacity) = std::env::var("TOKEN_LEDGER_MAILBOX") {
            config.mailbox_capacity = capacity.parse().map_err(|_| {
                crate::Error::Config(format!("TOKEN_LEDGER_MAILBOX: not a number: {}", capacity))
            })?;
        }

        if let Ok(seed) = std::env::var("TOKEN_LEDGER_FACTORY_SEED") {
            config.factory_seed = seed;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values the runtime cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        if self.factory_seed.is_empty() {
            return Err(crate::Error::Config("factory_seed must not be empty".to_string()));
        }
        Ok(())
    }

    /// Factory address derived from `factory_seed`
    pub fn factory_address(&self) -> AccountId {
        AccountId::derive(self.factory_seed.as_bytes())
    }
}
