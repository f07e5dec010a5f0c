//! Bounded LRU store backing the memory tier.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use lru::LruCache;

/// Default number of entries held by the memory tier
pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;

/// Thread-safe LRU store with O(1) get/put.
///
/// Recency order is maintained by the underlying linked hash map: `get` and
/// `put` promote to most-recently-used, and a `put` of a new key into a full
/// store evicts the least-recently-used entry first.
pub struct LruMemoryStore<V>
where
    V: Clone,
{
    cache: RwLock<LruCache<String, V>>,
}

impl<V> LruMemoryStore<V>
where
    V: Clone,
{
    /// Creates a store holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(non_zero(capacity))),
        }
    }

    /// Gets a value and promotes it to most-recently-used.
    ///
    /// A miss has no side effects.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.cache.write().ok()?;
        cache.get(key).cloned()
    }

    /// Reads a value without touching recency order
    pub fn peek(&self, key: &str) -> Option<V> {
        let cache = self.cache.read().ok()?;
        cache.peek(key).cloned()
    }

    /// Inserts or updates a value, promoting it to most-recently-used.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn put(&self, key: String, value: V) -> Option<String> {
        let mut cache = self.cache.write().ok()?;
        match cache.push(key.clone(), value) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        }
    }

    /// Removes a single key
    pub fn pop(&self, key: &str) -> Option<V> {
        let mut cache = self.cache.write().ok()?;
        cache.pop(key)
    }

    /// Checks if a key exists (without affecting LRU order)
    pub fn contains(&self, key: &str) -> bool {
        self.cache
            .read()
            .map(|c| c.contains(key))
            .unwrap_or(false)
    }

    /// Returns keys from most to least recently used, without promoting them
    pub fn keys(&self) -> Vec<String> {
        self.cache
            .read()
            .map(|c| c.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the current number of entries
    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Checks if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the store
    pub fn capacity(&self) -> usize {
        self.cache.read().map(|c| c.cap().get()).unwrap_or(0)
    }

    /// Changes the capacity, evicting least-recently-used entries if needed.
    ///
    /// Returns the number of entries evicted.
    pub fn resize(&self, capacity: usize) -> usize {
        let mut cache = match self.cache.write() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        let before = cache.len();
        cache.resize(non_zero(capacity));
        before - cache.len()
    }

    /// Clears all entries
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}

impl<V: Clone> Default for LruMemoryStore<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
