//! Runtime configuration for the cache services.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::lru_cache::DEFAULT_MEMORY_CAPACITY;

/// Configuration for the cache stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory tier
    pub memory_capacity: usize,

    /// Interval of the background sweep over session/local tiers
    pub cleanup_interval: Duration,

    /// Consecutive failures before a tier's circuit opens
    pub failure_threshold: u32,

    /// How long an open circuit waits before a trial request
    pub reset_timeout: Duration,

    /// Retries after the first failed storage operation or fetch
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    pub retry_base_delay: Duration,

    /// Latency samples kept per tier for average/p95
    pub max_latency_samples: usize,

    /// File backing the local tier (None = process-scoped)
    pub local_storage_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            cleanup_interval: Duration::from_secs(300), // 5 minutes
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            max_latency_samples: 1000,
            local_storage_path: None,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with the given memory capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            memory_capacity: capacity,
            ..Default::default()
        }
    }

    /// Sets the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Sets the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the circuit reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets retry count and base backoff delay
    pub fn retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Sets how many latency samples are kept per tier
    pub fn max_latency_samples(mut self, samples: usize) -> Self {
        self.max_latency_samples = samples.max(1);
        self
    }

    /// Backs the local tier with a file
    pub fn local_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_storage_path = Some(path.into());
        self
    }

    /// Backoff delay before retry number `attempt` (0-based): base * 2^attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Loads configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let memory_capacity = env_parse("CACHE_SIZE").unwrap_or(defaults.memory_capacity);

        let cleanup_interval = env_parse("CACHE_CLEANUP_INTERVAL_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.cleanup_interval);

        let failure_threshold: u32 =
            env_parse("CACHE_FAILURE_THRESHOLD").unwrap_or(defaults.failure_threshold);

        let reset_timeout = env_parse("CACHE_RESET_TIMEOUT_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.reset_timeout);

        let max_retries = env_parse("CACHE_MAX_RETRIES").unwrap_or(defaults.max_retries);

        let retry_base_delay = env_parse("CACHE_RETRY_BASE_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_base_delay);

        let max_latency_samples: usize =
            env_parse("CACHE_MAX_LATENCY_SAMPLES").unwrap_or(defaults.max_latency_samples);

        let local_storage_path = std::env::var("CACHE_LOCAL_STORAGE_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Self {
            memory_capacity,
            cleanup_interval,
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            max_retries,
            retry_base_delay,
            max_latency_samples: max_latency_samples.max(1),
            local_storage_path,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
