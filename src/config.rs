//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::DEFAULT_SWEEP_BATCH;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Byte budget for admission control, 0 = unbounded
    pub max_bytes: usize,
    /// Time between background sweeps
    pub sweep_interval: Duration,
    /// Entries inspected per sweep before switching to sampling
    pub sweep_batch: usize,
}

impl CacheConfig {
    /// Creates a config with the given budget and default sweep settings.
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMCACHE_MAX_BYTES` - Byte budget (default: 0, unbounded)
    /// - `MEMCACHE_SWEEP_INTERVAL_MS` - Sweep frequency in milliseconds (default: 1000)
    /// - `MEMCACHE_SWEEP_BATCH` - Sweep batch size (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: env::var("MEMCACHE_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_bytes),
            sweep_interval: env::var("MEMCACHE_SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.sweep_interval),
            sweep_batch: env::var("MEMCACHE_SWEEP_BATCH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|batch: &usize| *batch > 0)
                .unwrap_or(defaults.sweep_batch),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            sweep_interval: Duration::from_secs(1),
            sweep_batch: DEFAULT_SWEEP_BATCH,
        }
    }
}
