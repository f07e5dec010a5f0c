//! crm-cache: client-side caching and data access for a CRM.
//!
//! Exposes the multi-tier cache, the query optimizer and the query state
//! machines built on top of them.

pub mod cache;
pub mod db;
pub mod error;
pub mod hooks;
pub mod services;
pub mod utils;

// Cache exports
pub use cache::{
    CacheConfig, CacheManager, CacheManagerBuilder, CacheMetrics, CachePolicy, DurationPreset,
    FetchOptions, InvalidationDomain, SetOptions, StorageType,
};

// Data access exports
pub use db::{DataSource, QueryOptimizer, QueryOptimizerConfig, QueryOptions};
pub use hooks::{PaginatedQuery, RealtimeQuery};

pub use error::{CacheError, FetchError, QueryError};
pub use services::{ConnectionInfo, EffectiveType, NetworkCondition, NetworkSpeedService};
pub use utils::create_cache_key;
