//! Configuration for the delegation ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Actor configuration
    pub actor: ActorConfig,

    /// Genesis import/export
    pub genesis: GenesisConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/delegation"),
            service_name: "delegation-core".to_string(),
            storage: StorageConfig::default(),
            actor: ActorConfig::default(),
            genesis: GenesisConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Which key-value backend holds ledger state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory `BTreeMap`, lost on exit
    Memory,
    /// RocksDB under `data_dir`
    RocksDb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: StorageBackend,

    /// RocksDB tuning
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
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
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
        }
    }
}

/// Single-writer actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox capacity
    pub mailbox_capacity: usize,

    /// Height of the first block when the store has none recorded
    pub initial_height: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            initial_height: 1,
        }
    }
}

/// Genesis import/export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// JSON file imported when the store is empty
    pub import_path: Option<PathBuf>,

    /// JSON file written on shutdown
    pub export_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("DELEGATION_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("DELEGATION_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(filter) = std::env::var("DELEGATION_LOG_FILTER") {
            config.logging.filter = filter;
        }

        if let Ok(path) = std::env::var("DELEGATION_GENESIS") {
            config.genesis.import_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "delegation-core");
        assert_eq!(config.storage.backend, StorageBackend::RocksDb);
        assert_eq!(config.actor.initial_height, 1);
        assert!(config.genesis.import_path.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            data_dir = "/tmp/ledger"

            [storage]
            backend = "memory"

            [actor]
            mailbox_capacity = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.actor.mailbox_capacity, 16);
        assert_eq!(config.actor.initial_height, 1);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_bad_toml() {
        let err = Config::from_toml("storage = 5").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
