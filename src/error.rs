//! Error types for the cache, fetch and query layers.

use std::time::Duration;

use thiserror::Error;

/// Storage-tier failures.
///
/// These never reach callers of [`CacheManager`](crate::cache::CacheManager):
/// the recovery layer turns them into a fallback.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage quota exceeded for {tier}: {used} of {quota} bytes")]
    QuotaExceeded {
        tier: String,
        used: usize,
        quota: usize,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// Network fetch failures, surfaced by `cached_fetch` once retries run out.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error! status: {status} ({url})")]
    Status { status: u16, url: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures of the query optimizer.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    #[error("Data source error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("Invalid query: {0}")]
    InvalidRequest(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
pub type FetchResult<T> = Result<T, FetchError>;
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::QuotaExceeded {
            tier: "local".to_string(),
            used: 120,
            quota: 100,
        };
        assert!(err.to_string().contains("local"));

        let err = FetchError::Status {
            status: 503,
            url: "https://api.example.com".to_string(),
        };
        assert!(err.to_string().contains("503"));

        let err = QueryError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_source_error_conversion() {
        let err: QueryError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, QueryError::Source(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
