//! Multi-tier cache for the CRM data layer.
//!
//! This module provides:
//! - An LRU memory tier with lazy TTL checks
//! - Session and local tiers behind [`StorageBackend`], swept periodically
//! - Per-tier circuit breakers with retry and exponential backoff
//! - Per-tier hit/miss/eviction/latency telemetry
//! - Policy tables for durations, volatile keys and invalidation
//!
//! # Example
//!
//! ```rust,ignore
//! use crm_cache::cache::{CacheConfig, CacheManager, SetOptions, StorageType};
//!
//! let manager = CacheManager::builder()
//!     .with_config(CacheConfig::from_env())
//!     .build()?;
//! manager.start_cleanup();
//!
//! manager.set_item("workspace:42", &workspace, SetOptions::new()).await;
//! let cached: Option<Workspace> = manager.get_item("workspace:42", StorageType::Memory).await;
//! ```

pub mod cleanup;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod lru_cache;
pub mod manager;
pub mod monitoring;
pub mod policy;
pub mod recovery;
pub mod storage;

// Re-exports
pub use cleanup::{CacheCleanupService, CleanupReport};
pub use config::CacheConfig;
pub use entry::CachedItem;
pub use invalidation::InvalidationReport;
pub use lru_cache::LruMemoryStore;
pub use manager::{CacheManager, CacheManagerBuilder, FetchOptions, SetOptions};
pub use monitoring::{CacheMetrics, CacheMonitor, LatencyStats};
pub use policy::{
    cache_duration, generate_cache_key, CachePolicy, DurationPreset, InvalidationDomain,
    InvalidationRule, KeyType, StorageConfig,
};
pub use recovery::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorRecoveryService};
pub use storage::{FileStorage, InMemoryStorage, StorageBackend, StorageType};
