//! Services the cache leans on.
//!
//! - **Network speed**: connection-quality tracking and cache hints
//! - **Fetcher**: the HTTP transport behind `cached_fetch`

pub mod fetcher;
pub mod network_speed;

// Re-exports
pub use fetcher::{
    FetchRequest, FetchResponse, HttpFetcher, HttpMethod, MockFetcher, ReqwestFetcher,
};
pub use network_speed::{ConnectionInfo, EffectiveType, NetworkCondition, NetworkSpeedService};
