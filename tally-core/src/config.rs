use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Engine configuration for cache lifetimes, drain cadence and persistence
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime of the in-memory read cache per collection
    pub memory_cache_ttl: Duration,

    /// Staleness window of the durable snapshot partition
    pub snapshot_ttl: Duration,

    /// Period of the background drain while online
    pub drain_interval: Duration,

    /// Retry policy wrapped around every remote call
    pub retry_policy: RetryPolicy,

    /// Dead log records tolerated before the queue log is compacted
    pub compact_threshold: usize,

    /// Directory of the durable queue store (None = in-memory)
    pub store_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_cache_ttl: Duration::from_secs(30),
            snapshot_ttl: Duration::from_secs(10 * 60),
            drain_interval: Duration::from_secs(5 * 60),
            retry_policy: RetryPolicy::standard(),
            compact_threshold: 256,
            store_path: None,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the in-memory read cache lifetime
    pub fn with_memory_cache_ttl(mut self, ttl: Duration) -> Self {
        self.memory_cache_ttl = ttl;
        self
    }

    /// Set the durable snapshot staleness window
    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Set the background drain period
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Set the retry policy for remote calls
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the compaction threshold of the queue log
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }

    /// Persist the queue under the given directory
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_cache_ttl.is_zero() {
            return Err("memory_cache_ttl must be greater than 0".to_string());
        }

        if self.snapshot_ttl < self.memory_cache_ttl {
            return Err("snapshot_ttl must not be shorter than memory_cache_ttl".to_string());
        }

        if self.drain_interval.is_zero() {
            return Err("drain_interval must be greater than 0".to_string());
        }

        if self.retry_policy.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be at least 1.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.retry_policy.jitter) {
            return Err("jitter must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}
