//! Cached item envelope with expiry metadata.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value with its expiry and creation time (epoch milliseconds).
///
/// Persistent tiers store this envelope as JSON:
/// `{"value": ..., "expiry": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedItem<T> {
    /// The cached value
    pub value: T,

    /// Instant after which the item is no longer served
    pub expiry: i64,

    /// When the item was written
    pub timestamp: i64,
}

impl<T> CachedItem<T> {
    /// Creates an item written at `now` that lives for `ttl`.
    ///
    /// The expiry always lands strictly after the write time, even for a
    /// zero TTL.
    pub fn new(value: T, ttl: Duration, now: i64) -> Self {
        let ttl_ms = (ttl.as_millis() as i64).max(1);
        Self {
            value,
            expiry: now.saturating_add(ttl_ms),
            timestamp: now,
        }
    }

    /// Checks if the item has expired at `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expiry
    }

    /// Returns remaining lifetime at `now` (None once expired)
    pub fn remaining_ttl(&self, now: i64) -> Option<Duration> {
        if self.is_expired_at(now) {
            None
        } else {
            Some(Duration::from_millis((self.expiry - now) as u64))
        }
    }

    /// Returns how long ago the item was written
    pub fn age(&self, now: i64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.timestamp).max(0) as u64)
    }

    /// Consumes the item and returns the value
    pub fn into_value(self) -> T {
        self.value
    }
}

impl CachedItem<Value> {
    /// Parses a JSON envelope read from a persistent tier
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serializes the envelope for a persistent tier
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
