use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Response cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Enable/disable caching
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum cache size in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Maximum number of stored keys
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// How long an entry stays in the store regardless of HTTP freshness, in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Snapshot file read at startup and written at shutdown
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size() -> u64 {
    256 * 1024 * 1024 // 256MB
}

fn default_max_entries() -> usize {
    100_000
}

fn default_ttl() -> u64 {
    30 * 24 * 3600 // 30 days
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size: default_max_size(),
            max_entries: default_max_entries(),
            ttl_secs: default_ttl(),
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(anyhow::anyhow!("Cache max_size must be greater than 0"));
        }

        if self.max_entries == 0 {
            return Err(anyhow::anyhow!("Cache max_entries must be greater than 0"));
        }

        if self.ttl_secs == 0 {
            return Err(anyhow::anyhow!("Cache ttl_secs must be greater than 0"));
        }

        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
