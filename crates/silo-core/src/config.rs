//! Runtime configuration
//!
//! One nested structure covering every tunable the pipeline exposes.
//! Defaults match the values the producer and consumer must agree on;
//! `segments.segment_size` in particular MUST be identical on both
//! sides of a share.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default fixed segment size in bytes (the final segment of a file may
/// be shorter; packed segments aggregate up to this size)
pub const DEFAULT_SEGMENT_SIZE: u32 = 768_000;

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SiloConfig {
    pub storage: StorageSettings,
    pub segments: SegmentSettings,
    pub nntp: NntpSettings,
    pub pool: PoolSettings,
    pub retry: RetrySettings,
    pub kdf: KdfSettings,
    pub queue: QueueSettings,
}

/// Where persistent state lives
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding the entity tables and wrapped-key store
    pub data_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "silo-data".to_string(),
        }
    }
}

/// Slicing and redundancy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSettings {
    /// Fixed slice size; identical between producer and consumer
    pub segment_size: u32,
    /// Redundancy copies per segment, 0..=5; 0 = no duplication
    pub redundancy_level: u8,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            redundancy_level: 0,
        }
    }
}

/// Upstream NNTP endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NntpSettings {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    /// Newsgroup segment articles are posted to
    pub group: String,
    /// RFC 5322 From header for posted articles
    pub from: String,
}

impl Default for NntpSettings {
    fn default() -> Self {
        Self {
            host: "news.example.net".to_string(),
            port: 563,
            tls: true,
            username: String::new(),
            group: "alt.binaries.misc".to_string(),
            from: "poster <poster@ngPost.com>".to_string(),
        }
    }
}

/// Connection pool hygiene
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Hard cap on concurrent upstream sessions
    pub max_connections: usize,
    /// Sessions kept warm when idle
    pub min_idle: usize,
    pub idle_timeout_sec: u64,
    pub max_lifetime_sec: u64,
    pub acquire_timeout_sec: u64,
    /// Sessions idle longer than this are health-probed on acquisition
    pub probe_interval_sec: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 60,
            min_idle: 1,
            idle_timeout_sec: 300,
            max_lifetime_sec: 3600,
            acquire_timeout_sec: 5,
            probe_interval_sec: 60,
        }
    }
}

impl PoolSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_sec)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_sec)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_sec)
    }
}

/// Retry and timeout policy for article posts and fetches
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub upload_retries_max: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_cap_ms: u64,
    /// Single article post/fetch budget
    pub article_timeout_sec: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            upload_retries_max: 5,
            retry_backoff_base_ms: 500,
            retry_backoff_cap_ms: 30_000,
            article_timeout_sec: 30,
        }
    }
}

impl RetrySettings {
    pub fn article_timeout(&self) -> Duration {
        Duration::from_secs(self.article_timeout_sec)
    }
}

/// Password KDF costs for PROTECTED shares and the identity storage key
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfSettings {
    /// log2 of the scrypt CPU/memory cost (N = 16384 -> 14)
    pub scrypt_log_n: u8,
    pub scrypt_r: u32,
    pub scrypt_p: u32,
    pub pbkdf2_iterations: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            scrypt_log_n: 14,
            scrypt_r: 8,
            scrypt_p: 1,
            pbkdf2_iterations: 100_000,
        }
    }
}

/// Upload queue backpressure marks
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Ingestion blocks once this many entries are queued
    pub high_water: usize,
    /// Ingestion resumes once the queue drains below this
    pub low_water: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            high_water: 1024,
            low_water: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let cfg = SiloConfig::default();
        assert_eq!(cfg.segments.segment_size, 768_000);
        assert_eq!(cfg.segments.redundancy_level, 0);
        assert_eq!(cfg.pool.max_connections, 60);
        assert_eq!(cfg.pool.min_idle, 1);
        assert_eq!(cfg.pool.idle_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.pool.max_lifetime(), Duration::from_secs(3600));
        assert_eq!(cfg.retry.upload_retries_max, 5);
        assert_eq!(cfg.retry.retry_backoff_base_ms, 500);
        assert_eq!(cfg.retry.retry_backoff_cap_ms, 30_000);
        assert_eq!(1u32 << cfg.kdf.scrypt_log_n, 16384);
        assert_eq!(cfg.kdf.pbkdf2_iterations, 100_000);
    }

    #[test]
    fn test_queue_marks_ordered() {
        let cfg = QueueSettings::default();
        assert!(cfg.low_water < cfg.high_water);
    }
}
