//! Cache configuration.

use std::time::Duration;

/// Default time-to-live for cached results (5 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Longest TTL honoured. Larger values are clamped so expiry stamps never
/// overflow `Instant`.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Default capacity before least-recently-used eviction kicks in.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Default interval between background sweeps of expired entries.
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a cached result stays valid.
    pub ttl: Duration,
    /// Hard ceiling on the number of cached entries.
    pub max_entries: usize,
    /// How often the sweeper purges expired entries. `None` disables it.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            sweep_interval: Some(Duration::from_secs(DEFAULT_CACHE_SWEEP_INTERVAL_SECS)),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `QUILL_CACHE_TTL_SECS`: entry time-to-live, clamped to [`MAX_CACHE_TTL`] (default: 300)
    /// - `QUILL_CACHE_MAX_ENTRIES`: capacity (default: 10000)
    /// - `QUILL_CACHE_SWEEP_INTERVAL_SECS`: sweep period, 0 disables (default: 60)
    pub fn from_env() -> Self {
        let ttl = Duration::from_secs(
            std::env::var("QUILL_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
        )
        .min(MAX_CACHE_TTL);

        let max_entries = std::env::var("QUILL_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);

        let sweep_secs: u64 = std::env::var("QUILL_CACHE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS);

        Self {
            ttl,
            max_entries,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        }
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the capacity.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set or disable the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }
}
