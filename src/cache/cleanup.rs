//! Cache cleanup service.
//!
//! Owns the memory tier's LRU store and periodically sweeps expired or
//! malformed envelopes out of the session and local tiers. The memory tier
//! is bounded by capacity and checked for expiry lazily on read, so the
//! sweep leaves it alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::utils::SharedClock;

use super::config::CacheConfig;
use super::entry::CachedItem;
use super::lru_cache::LruMemoryStore;
use super::monitoring::CacheMonitor;
use super::storage::{StorageBackend, StorageType};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub session_removed: usize,
    pub local_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.session_removed + self.local_removed
    }
}

/// Memory-tier owner and periodic sweeper of the persistent tiers
pub struct CacheCleanupService {
    memory: LruMemoryStore<CachedItem<Value>>,
    session: Arc<dyn StorageBackend>,
    local: Arc<dyn StorageBackend>,
    monitor: Arc<CacheMonitor>,
    clock: SharedClock,
    cleanup_interval: Duration,
    started: AtomicBool,
}

impl CacheCleanupService {
    pub fn new(
        config: &CacheConfig,
        session: Arc<dyn StorageBackend>,
        local: Arc<dyn StorageBackend>,
        monitor: Arc<CacheMonitor>,
        clock: SharedClock,
    ) -> Self {
        info!(
            "Initializing CacheCleanupService (memory capacity: {}, sweep every {:?})",
            config.memory_capacity, config.cleanup_interval
        );
        Self {
            memory: LruMemoryStore::new(config.memory_capacity),
            session,
            local,
            monitor,
            clock,
            cleanup_interval: config.cleanup_interval,
            started: AtomicBool::new(false),
        }
    }

    /// Backend of a persistent tier (None for memory)
    pub fn backend(&self, storage: StorageType) -> Option<&Arc<dyn StorageBackend>> {
        match storage {
            StorageType::Memory => None,
            StorageType::Session => Some(&self.session),
            StorageType::Local => Some(&self.local),
        }
    }

    /// Writes to the memory tier; a capacity eviction counts as a memory eviction
    pub fn add_to_memory_cache(&self, key: String, item: CachedItem<Value>) {
        if let Some(evicted) = self.memory.put(key, item) {
            debug!("Evicted least recently used memory entry: {}", evicted);
            self.monitor.record_eviction(StorageType::Memory);
        }
        self.monitor.update_size(StorageType::Memory, self.memory.len());
    }

    /// Reads from the memory tier, promoting the entry
    pub fn get_from_memory_cache(&self, key: &str) -> Option<CachedItem<Value>> {
        self.memory.get(key)
    }

    /// Removes one memory entry
    pub fn remove_from_memory_cache(&self, key: &str) -> bool {
        let removed = self.memory.pop(key).is_some();
        self.monitor.update_size(StorageType::Memory, self.memory.len());
        removed
    }

    /// Empties the memory tier
    pub fn clear_memory_cache(&self) {
        self.memory.clear();
        self.monitor.update_size(StorageType::Memory, 0);
    }

    /// Memory keys, most recently used first
    pub fn memory_keys(&self) -> Vec<String> {
        self.memory.keys()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    /// Removes expired and unparseable entries from session and local tiers
    pub fn cleanup_expired_items(&self) -> CleanupReport {
        let report = CleanupReport {
            session_removed: self.sweep_tier(StorageType::Session, self.session.as_ref()),
            local_removed: self.sweep_tier(StorageType::Local, self.local.as_ref()),
        };
        if report.total() > 0 {
            info!(
                "Cache cleanup removed {} session and {} local entries",
                report.session_removed, report.local_removed
            );
        }
        report
    }

    fn sweep_tier(&self, storage: StorageType, backend: &dyn StorageBackend) -> usize {
        let keys = match backend.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Skipping {} cleanup, cannot list keys: {}", storage, e);
                return 0;
            }
        };

        let now = self.clock.now_millis();
        let mut removed = 0;

        for key in keys {
            // A concurrent writer may have removed or replaced it meanwhile
            let raw = match backend.get_item(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Cannot read {} entry {}: {}", storage, key, e);
                    continue;
                }
            };

            let expired = match CachedItem::from_json(&raw) {
                Ok(item) => item.expiry < now,
                Err(_) => true,
            };

            if expired {
                match backend.remove_item(&key) {
                    Ok(()) => {
                        removed += 1;
                        self.monitor.record_eviction(storage);
                    }
                    Err(e) => debug!("Cannot remove {} entry {}: {}", storage, key, e),
                }
            }
        }

        if let Ok(keys) = backend.keys() {
            self.monitor.update_size(storage, keys.len());
        }

        removed
    }

    /// Starts the periodic sweep.
    ///
    /// The sweep runs for the life of the runtime. Returns None if it was
    /// already started.
    pub fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Cache cleanup already running");
            return None;
        }

        let service = self.clone();
        Some(tokio::spawn(async move {
            info!("Cache cleanup started (interval: {:?})", service.cleanup_interval);

            let mut ticker = interval(service.cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = service.cleanup_expired_items();
                debug!("Cache sweep finished: {:?}", report);
            }
        }))
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
