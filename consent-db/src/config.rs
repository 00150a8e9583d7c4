//! Engine configuration

use std::env;
use std::time::Duration;

use consent_core::logging::LogLevel;
use consent_core::{HashAlgorithm, RevisionResult};

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// sled data directory, empty for in-memory storage
    pub data_dir: String,
    /// Flush to disk after every write
    pub flush_on_write: bool,
    /// sled page cache size (bytes)
    pub cache_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./consent_data".to_string(),
            flush_on_write: true,
            cache_capacity: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl StorageConfig {
    /// Development configuration
    pub fn development() -> Self {
        Self {
            data_dir: "./consent_dev_data".to_string(),
            flush_on_write: false,
            cache_capacity: 16 * 1024 * 1024, // 16MB
        }
    }

    /// Test configuration (in-memory storage)
    pub fn test() -> Self {
        Self {
            data_dir: String::new(),
            flush_on_write: false,
            cache_capacity: 4 * 1024 * 1024, // 4MB
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.data_dir.is_empty()
    }
}

/// Revision engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    /// Digest used for every revision hash; fixed for the life of a deployment
    pub hash_algorithm: HashAlgorithm,
    /// Retries after the first attempt when an update loses a head race
    pub max_conflict_retries: u32,
    /// Deadline applied to each store call
    pub store_timeout_ms: u64,
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            hash_algorithm: HashAlgorithm::Sha1,
            max_conflict_retries: 3,
            store_timeout_ms: 5000,
            log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - CONSENT_DATA_DIR: sled data directory (empty for in-memory)
    /// - CONSENT_HASH_ALGORITHM: sha1 or sha256
    /// - CONSENT_MAX_CONFLICT_RETRIES: update retries on conflict
    /// - CONSENT_STORE_TIMEOUT_MS: per-call store deadline in milliseconds
    /// - CONSENT_LOG_LEVEL: error/warn/info/debug/trace
    ///
    /// Unparseable numbers fall back to defaults. An unknown hash algorithm
    /// or log level is an error.
    pub fn from_env() -> RevisionResult<Self> {
        let defaults = Self::default();

        let hash_algorithm = match env::var("CONSENT_HASH_ALGORITHM") {
            Ok(s) => HashAlgorithm::parse(&s)?,
            Err(_) => defaults.hash_algorithm,
        };
        let log_level = match env::var("CONSENT_LOG_LEVEL") {
            Ok(s) => LogLevel::parse(&s)?,
            Err(_) => defaults.log_level,
        };

        Ok(Self {
            storage: StorageConfig {
                data_dir: env::var("CONSENT_DATA_DIR").unwrap_or(defaults.storage.data_dir),
                ..defaults.storage
            },
            hash_algorithm,
            max_conflict_retries: env::var("CONSENT_MAX_CONFLICT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_conflict_retries),
            store_timeout_ms: env::var("CONSENT_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.store_timeout_ms),
            log_level,
        })
    }

    /// In-memory configuration for tests
    pub fn test() -> Self {
        Self {
            storage: StorageConfig::test(),
            ..Self::default()
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
