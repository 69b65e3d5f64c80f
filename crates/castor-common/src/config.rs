//! Engine configuration structures.
//!
//! These structures define all configurable aspects of a CastorDB
//! instance.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_DIRTY_PAGE_THRESHOLD, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_CACHE_SIZE,
    DEFAULT_MAX_KEYS_PER_NODE, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_SCHEDULER_WORKERS,
    DEFAULT_WAL_BUFFER_CAPACITY, DEFAULT_WAL_SIZE_THRESHOLD, DEFAULT_WRITER_WORKERS,
    WAL_FILE_NAME,
};

/// Main engine configuration.
///
/// # Example
///
/// ```rust
/// use castor_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_keys_per_node, 64);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,

    /// Maximum number of keys in a B+-tree node (M).
    pub max_keys_per_node: usize,

    /// Page cache configuration.
    pub cache: CacheConfig,

    /// Writer queue configuration.
    pub writer: WriterConfig,

    /// Write-ahead log configuration.
    pub wal: WalConfig,

    /// Job scheduler configuration.
    pub scheduler: SchedulerConfig,

    /// Checkpoint configuration.
    pub checkpoint: CheckpointConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./castor-data"),
            max_keys_per_node: DEFAULT_MAX_KEYS_PER_NODE,
            cache: CacheConfig::default(),
            writer: WriterConfig::default(),
            wal: WalConfig::default(),
            scheduler: SchedulerConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at the given data directory.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Creates a small configuration for testing.
    #[must_use]
    pub fn for_testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_keys_per_node: 4,
            cache: CacheConfig { max_cache_size: 16 },
            writer: WriterConfig {
                batch_timeout: Duration::from_millis(1),
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                num_workers: 1,
                tick_interval: Duration::from_millis(5),
                ..Default::default()
            },
            checkpoint: CheckpointConfig {
                // Long enough that tests control checkpoints explicitly.
                interval: Duration::from_secs(3600),
                poll_interval: Duration::from_secs(3600),
                cleanup_interval: Duration::from_secs(3600),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_keys_per_node < 3 {
            return Err("max_keys_per_node must be at least 3".to_string());
        }
        if self.cache.max_cache_size < 2 {
            return Err("cache.max_cache_size must be at least 2".to_string());
        }
        if self.writer.num_workers == 0 {
            return Err("writer.num_workers must be at least 1".to_string());
        }
        if self.writer.max_queue_size == 0 {
            return Err("writer.max_queue_size must be at least 1".to_string());
        }
        if self.writer.max_batch_size == 0 {
            return Err("writer.max_batch_size must be at least 1".to_string());
        }
        if self.scheduler.num_workers == 0 {
            return Err("scheduler.num_workers must be at least 1".to_string());
        }
        if self.wal.buffer_capacity == 0 {
            return Err("wal.buffer_capacity must be non-zero".to_string());
        }
        Ok(())
    }

    /// Returns the WAL file path under the data directory.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal.file_name)
    }
}

/// Page cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hard cap on cached pages; exceeding it triggers eviction.
    /// Default: 100
    pub max_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        }
    }
}

/// Writer queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Number of writer worker threads.
    /// Default: 2
    pub num_workers: usize,

    /// Queue capacity; `enqueue` refuses new work beyond it.
    /// Default: 1000
    pub max_queue_size: usize,

    /// Maximum requests drained per batch.
    /// Default: 10
    pub max_batch_size: usize,

    /// How long a worker waits for a batch to fill.
    /// Default: 10ms
    #[serde(with = "humantime_serde")]
    pub batch_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_WRITER_WORKERS,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_timeout: Duration::from_millis(10),
        }
    }
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// WAL file name (relative to the data directory).
    pub file_name: PathBuf,

    /// In-memory append buffer capacity; a full buffer forces a flush.
    /// Default: 8 KiB
    pub buffer_capacity: usize,

    /// Force fsync on every commit.
    /// Default: true
    pub sync_on_commit: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            file_name: PathBuf::from(WAL_FILE_NAME),
            buffer_capacity: DEFAULT_WAL_BUFFER_CAPACITY,
            sync_on_commit: true,
        }
    }
}

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    /// Default: 4
    pub num_workers: usize,

    /// Promoter thread tick interval.
    /// Default: 50ms
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Default job timeout.
    /// Default: 5 min
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// How long completed job records are retained.
    /// Default: 24h
    #[serde(with = "humantime_serde")]
    pub completed_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_SCHEDULER_WORKERS,
            tick_interval: Duration::from_millis(50),
            default_timeout: Duration::from_secs(300),
            completed_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Time between checkpoints.
    /// Default: 5 min
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// WAL size that triggers a checkpoint (bytes).
    /// Default: 1 MiB
    pub wal_size_threshold: u64,

    /// Dirty page count that triggers a checkpoint.
    /// Default: 100
    pub dirty_page_threshold: usize,

    /// How often the trigger conditions are evaluated.
    /// Default: 10s
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How often the WAL cleanup job runs.
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Number of LSNs below the checkpoint kept back from truncation.
    /// Default: 64
    pub safety_margin: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            wal_size_threshold: DEFAULT_WAL_SIZE_THRESHOLD,
            dirty_page_threshold: DEFAULT_DIRTY_PAGE_THRESHOLD,
            poll_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(60),
            safety_margin: 64,
        }
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_keys_per_node, 64);
        assert_eq!(config.writer.num_workers, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.max_keys_per_node = 2;
        assert!(config.validate().is_err());

        config.max_keys_per_node = 64;
        config.writer.num_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_testing_config() {
        let config = EngineConfig::for_testing("/tmp/castor_test");
        assert_eq!(config.max_keys_per_node, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wal_path() {
        let config = EngineConfig::with_data_dir("/tmp/db");
        assert_eq!(config.wal_path(), PathBuf::from("/tmp/db/btree.wal"));
    }
}
