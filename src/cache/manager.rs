//! Cache façade.
//!
//! [`CacheManager`] composes the policy tables, the memory tier owned by the
//! cleanup service, the persistent tiers, error recovery, monitoring and
//! the network speed service into the public cache API. Storage failures
//! never reach callers; only `cached_fetch` surfaces errors, and only once
//! its retries are exhausted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CacheResult, FetchError, FetchResult};
use crate::services::fetcher::{FetchRequest, HttpFetcher, HttpMethod, ReqwestFetcher};
use crate::services::network_speed::NetworkSpeedService;
use crate::utils::{SharedClock, SystemClock};

use super::cleanup::CacheCleanupService;
use super::config::CacheConfig;
use super::entry::CachedItem;
use super::monitoring::{CacheMetrics, CacheMonitor};
use super::policy::{CachePolicy, DurationPreset};
use super::recovery::ErrorRecoveryService;
use super::storage::{FileStorage, InMemoryStorage, StorageBackend, StorageType};

/// Options for [`CacheManager::set_item`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Named lifetime, medium when unset
    pub duration: Option<DurationPreset>,
    /// Requested tier, memory when unset
    pub storage: Option<StorageType>,
    /// Explicit lifetime, wins over `duration`
    pub expires_in: Option<Duration>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(mut self, preset: DurationPreset) -> Self {
        self.duration = Some(preset);
        self
    }

    pub fn storage(mut self, storage: StorageType) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    fn ttl(&self) -> Duration {
        self.expires_in
            .unwrap_or_else(|| self.duration.unwrap_or_default().as_duration())
    }
}

/// Options for [`CacheManager::cached_fetch`].
///
/// Cache time, tier and timeout default to what the network speed service
/// suggests at call time.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Cache key, the URL when unset
    pub cache_key: Option<String>,
    pub cache_time: Option<Duration>,
    pub storage: Option<StorageType>,
    pub timeout: Option<Duration>,
    /// Total attempts
    pub retries: u32,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_key: None,
            cache_time: None,
            storage: None,
            timeout: None,
            retries: 3,
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_time(mut self, ttl: Duration) -> Self {
        self.cache_time = Some(ttl);
        self
    }

    pub fn storage(mut self, storage: StorageType) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Multi-tier cache façade
pub struct CacheManager {
    config: CacheConfig,
    policy: CachePolicy,
    cleanup: Arc<CacheCleanupService>,
    recovery: ErrorRecoveryService,
    monitor: Arc<CacheMonitor>,
    network: Arc<NetworkSpeedService>,
    fetcher: Arc<dyn HttpFetcher>,
    clock: SharedClock,
}

impl CacheManager {
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    /// Writes `value` and returns the tier it landed in, or `None` when the
    /// value could not be encoded and nothing was written.
    ///
    /// Volatile keys for the requested tier go to memory. A failed
    /// persistent write falls back to memory and counts as a miss.
    pub async fn set_item<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Option<StorageType> {
        let started = Instant::now();
        let requested = options.storage.unwrap_or_default();
        let storage = self.policy.effective_storage(key, requested);
        if storage != requested {
            debug!("Volatile key {} redirected from {} to memory", key, requested);
        }

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!("Cannot serialize cache value for {}: {}", key, e);
                self.monitor.record_miss(storage);
                return None;
            }
        };
        let item = CachedItem::new(value, options.ttl(), self.clock.now_millis());

        let written = match self.cleanup.backend(storage) {
            None => {
                self.cleanup.add_to_memory_cache(key.to_string(), item);
                true
            }
            Some(backend) => {
                let raw = match item.to_json() {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Cannot encode cache envelope for {}: {}", key, e);
                        self.monitor.record_miss(storage);
                        return None;
                    }
                };
                let fallback_item = item;
                let written = self
                    .recovery
                    .execute_with_recovery(
                        storage,
                        || std::future::ready(backend.set_item(key, &raw).map(|_| true)),
                        || {
                            self.cleanup
                                .add_to_memory_cache(key.to_string(), fallback_item);
                            false
                        },
                    )
                    .await;
                if written {
                    self.refresh_size(storage, backend.as_ref());
                }
                written
            }
        };

        if written {
            debug!("Cached {} in {}", key, storage);
            self.monitor.record_hit(storage, elapsed_ms(started));
            Some(storage)
        } else {
            warn!("Write of {} to {} failed, kept in memory", key, storage);
            self.monitor.record_miss(storage);
            Some(StorageType::Memory)
        }
    }

    /// Reads a live value. Expired and malformed entries are purged and
    /// reported as a miss.
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str, storage: StorageType) -> Option<T> {
        let started = Instant::now();
        let storage = self.policy.effective_storage(key, storage);
        let now = self.clock.now_millis();

        let item = match self.cleanup.backend(storage) {
            None => self.cleanup.get_from_memory_cache(key),
            Some(backend) => {
                let raw = self
                    .recovery
                    .execute_with_recovery(
                        storage,
                        || std::future::ready(backend.get_item(key)),
                        || None,
                    )
                    .await;
                match raw.map(|raw| CachedItem::from_json(&raw)) {
                    None => None,
                    Some(Ok(item)) => Some(item),
                    Some(Err(e)) => {
                        warn!("Purging malformed {} entry {}: {}", storage, key, e);
                        self.purge(key, storage);
                        self.monitor.record_miss(storage);
                        return None;
                    }
                }
            }
        };

        let Some(item) = item else {
            debug!("Cache miss: {} ({})", key, storage);
            self.monitor.record_miss(storage);
            return None;
        };

        if item.is_expired_at(now) {
            debug!("Cache entry expired: {} ({})", key, storage);
            self.purge(key, storage);
            self.monitor.record_eviction(storage);
            self.monitor.record_miss(storage);
            return None;
        }

        match serde_json::from_value(item.value) {
            Ok(value) => {
                self.monitor.record_hit(storage, elapsed_ms(started));
                Some(value)
            }
            Err(e) => {
                debug!("Cached {} does not match the requested type: {}", key, e);
                self.monitor.record_miss(storage);
                None
            }
        }
    }

    /// Removes one key from a tier. Returns false when the key was absent
    /// or the tier refused the removal.
    pub async fn remove_item(&self, key: &str, storage: StorageType) -> bool {
        match self.cleanup.backend(storage) {
            None => self.cleanup.remove_from_memory_cache(key),
            Some(backend) => {
                let removed = self
                    .recovery
                    .execute_with_recovery(
                        storage,
                        || {
                            std::future::ready(backend.get_item(key).and_then(|existing| {
                                backend.remove_item(key)?;
                                Ok(existing.is_some())
                            }))
                        },
                        || false,
                    )
                    .await;
                if removed {
                    self.refresh_size(storage, backend.as_ref());
                }
                removed
            }
        }
    }

    /// Empties a whole tier
    pub async fn clear(&self, storage: StorageType) {
        match self.cleanup.backend(storage) {
            None => self.cleanup.clear_memory_cache(),
            Some(backend) => {
                let cleared = self
                    .recovery
                    .execute_with_recovery(
                        storage,
                        || std::future::ready(backend.clear().map(|_| true)),
                        || false,
                    )
                    .await;
                if cleared {
                    self.monitor.update_size(storage, 0);
                }
            }
        }
        info!("Cleared {} cache", storage);
    }

    /// Fetches JSON through the cache.
    ///
    /// A live cached value is returned without touching the network.
    /// Otherwise up to `retries` attempts are made, each raced against the
    /// timeout, with exponential backoff in between. A successful payload
    /// is cached; when every attempt fails the last error is returned.
    pub async fn cached_fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> FetchResult<T> {
        let cache_key = options.cache_key.clone().unwrap_or_else(|| url.to_string());
        let storage = options.storage.unwrap_or_else(|| {
            if self.network.should_use_persistent_cache() {
                StorageType::Local
            } else {
                StorageType::Memory
            }
        });
        let cache_time = options
            .cache_time
            .unwrap_or_else(|| self.network.optimal_cache_time());
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.network.optimal_timeout());

        if let Some(cached) = self.get_item::<T>(&cache_key, storage).await {
            debug!("Serving {} from {} cache", url, storage);
            return Ok(cached);
        }

        let request = FetchRequest {
            url: url.to_string(),
            method: options.method,
            headers: options.headers.clone(),
            body: options.body.clone(),
        };

        let attempts = options.retries.max(1);
        let mut last_error = FetchError::Network(format!("no attempt made for {}", url));

        for attempt in 0..attempts {
            let started = Instant::now();
            // Dropping the fetch future on timeout aborts the request
            let outcome = match tokio::time::timeout(timeout, self.fetcher.fetch(&request)).await {
                Err(_) => Err(FetchError::Timeout(timeout)),
                Ok(Err(e)) => Err(e),
                Ok(Ok(response)) if !response.is_ok() => Err(FetchError::Status {
                    status: response.status,
                    url: url.to_string(),
                }),
                Ok(Ok(response)) => response.json::<Value>(),
            };

            match outcome {
                Ok(payload) => {
                    self.network.record_rtt_sample(elapsed_ms(started));
                    let typed = serde_json::from_value::<T>(payload.clone())?;
                    self.set_item(
                        &cache_key,
                        &payload,
                        SetOptions::new().storage(storage).expires_in(cache_time),
                    )
                    .await;
                    return Ok(typed);
                }
                Err(e) => {
                    warn!(
                        "Fetch of {} failed (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = e;
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.backoff_delay(attempt)).await;
            }
        }

        Err(last_error)
    }

    /// Metrics snapshot of a tier
    pub fn metrics(&self, storage: StorageType) -> CacheMetrics {
        self.monitor.get_metrics(storage)
    }

    /// Starts the periodic sweep of the persistent tiers
    pub fn start_cleanup(&self) -> Option<JoinHandle<()>> {
        self.cleanup.clone().start()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn cleanup(&self) -> &Arc<CacheCleanupService> {
        &self.cleanup
    }

    pub fn recovery(&self) -> &ErrorRecoveryService {
        &self.recovery
    }

    pub fn monitor(&self) -> &Arc<CacheMonitor> {
        &self.monitor
    }

    pub fn network(&self) -> &Arc<NetworkSpeedService> {
        &self.network
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Best-effort removal outside the recovery path
    pub(crate) fn purge(&self, key: &str, storage: StorageType) -> bool {
        match self.cleanup.backend(storage) {
            None => self.cleanup.remove_from_memory_cache(key),
            Some(backend) => {
                let removed = match backend.remove_item(key) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Cannot remove {} entry {}: {}", storage, key, e);
                        false
                    }
                };
                self.refresh_size(storage, backend.as_ref());
                removed
            }
        }
    }

    fn refresh_size(&self, storage: StorageType, backend: &dyn StorageBackend) {
        if let Ok(keys) = backend.keys() {
            self.monitor.update_size(storage, keys.len());
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Builds a [`CacheManager`] and the services it owns
#[derive(Default)]
pub struct CacheManagerBuilder {
    config: Option<CacheConfig>,
    policy: Option<CachePolicy>,
    clock: Option<SharedClock>,
    session: Option<Arc<dyn StorageBackend>>,
    local: Option<Arc<dyn StorageBackend>>,
    fetcher: Option<Arc<dyn HttpFetcher>>,
    network: Option<Arc<NetworkSpeedService>>,
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_session_storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.session = Some(backend);
        self
    }

    pub fn with_local_storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn HttpFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_network_service(mut self, network: Arc<NetworkSpeedService>) -> Self {
        self.network = Some(network);
        self
    }

    /// Builds the manager.
    ///
    /// The local tier defaults to a JSON file when the config names a path,
    /// and to an in-process store otherwise. Fails if that file cannot be
    /// opened.
    pub fn build(self) -> CacheResult<CacheManager> {
        let config = self.config.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(SystemClock::shared);

        let session = self
            .session
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new("session")));
        let local: Arc<dyn StorageBackend> = match (self.local, &config.local_storage_path) {
            (Some(local), _) => local,
            (None, Some(path)) => Arc::new(FileStorage::open(path)?),
            (None, None) => Arc::new(InMemoryStorage::new("local")),
        };

        let monitor = Arc::new(CacheMonitor::new(config.max_latency_samples));
        let cleanup = Arc::new(CacheCleanupService::new(
            &config,
            session,
            local,
            monitor.clone(),
            clock.clone(),
        ));
        let recovery = ErrorRecoveryService::new(&config, clock.clone());
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(NetworkSpeedService::new(clock.clone())));
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(ReqwestFetcher::new()));

        info!(
            "CacheManager ready (memory capacity: {}, fetcher: {})",
            config.memory_capacity,
            fetcher.fetcher_name()
        );

        Ok(CacheManager {
            config,
            policy: self.policy.unwrap_or_default(),
            cleanup,
            recovery,
            monitor,
            network,
            fetcher,
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fetcher::{FetchResponse, MockFetcher};
    use crate::utils::ManualClock;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Workspace {
        name: String,
    }

    struct Fixture {
        manager: CacheManager,
        clock: Arc<ManualClock>,
        session: Arc<InMemoryStorage>,
        local: Arc<InMemoryStorage>,
        fetcher: Arc<MockFetcher>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let session = Arc::new(InMemoryStorage::new("session"));
        let local = Arc::new(InMemoryStorage::new("local"));
        let fetcher = Arc::new(MockFetcher::new());
        let manager = CacheManager::builder()
            .with_config(CacheConfig::default().retries(1, Duration::from_millis(1)))
            .with_clock(clock.clone())
            .with_session_storage(session.clone())
            .with_local_storage(local.clone())
            .with_fetcher(fetcher.clone())
            .build()
            .unwrap();
        Fixture {
            manager,
            clock,
            session,
            local,
            fetcher,
        }
    }

    #[test]
    fn test_set_options_ttl() {
        assert_eq!(SetOptions::new().ttl(), Duration::from_secs(300));
        assert_eq!(
            SetOptions::new().duration(DurationPreset::Short).ttl(),
            Duration::from_secs(60)
        );
        assert_eq!(
            SetOptions::new()
                .duration(DurationPreset::Day)
                .expires_in(Duration::from_secs(5))
                .ttl(),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn test_set_get_memory_default() {
        let f = fixture();
        let ws = Workspace { name: "Acme".into() };

        let tier = f.manager.set_item("workspace:42", &ws, SetOptions::new()).await;
        assert_eq!(tier, Some(StorageType::Memory));

        let read: Option<Workspace> = f.manager.get_item("workspace:42", StorageType::Memory).await;
        assert_eq!(read, Some(ws));

        let metrics = f.manager.metrics(StorageType::Memory);
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.size, 1);
    }

    #[tokio::test]
    async fn test_unserializable_value_is_not_written() {
        let f = fixture();
        // Non-string map keys have no JSON form
        let value = BTreeMap::from([(vec![1u8], 1u8)]);

        let tier = f
            .manager
            .set_item("settings:bad", &value, SetOptions::new().storage(StorageType::Local))
            .await;

        assert_eq!(tier, None);
        assert!(f.local.is_empty());
        assert!(f.manager.cleanup().get_from_memory_cache("settings:bad").is_none());
        assert_eq!(f.manager.metrics(StorageType::Local).misses, 1);
    }

    #[tokio::test]
    async fn test_persistent_write_is_json_envelope() {
        let f = fixture();
        f.manager
            .set_item(
                "settings:theme",
                &json!("dark"),
                SetOptions::new().storage(StorageType::Local),
            )
            .await;

        let raw = f.local.get_item("settings:theme").unwrap().unwrap();
        let envelope: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope["value"], "dark");
        assert!(envelope["expiry"].as_i64().unwrap() > envelope["timestamp"].as_i64().unwrap());
        assert_eq!(f.manager.metrics(StorageType::Local).size, 1);
    }

    #[tokio::test]
    async fn test_volatile_key_lands_in_memory() {
        let f = fixture();
        let tier = f
            .manager
            .set_item("leads:123", &json!({"id": 123}), SetOptions::new().storage(StorageType::Local))
            .await;

        assert_eq!(tier, Some(StorageType::Memory));
        assert!(f.local.is_empty());
        assert!(f.manager.cleanup().get_from_memory_cache("leads:123").is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_removed() {
        let f = fixture();
        f.manager
            .set_item(
                "workspace:1",
                &json!(1),
                SetOptions::new()
                    .storage(StorageType::Session)
                    .duration(DurationPreset::Short),
            )
            .await;

        f.clock.advance(Duration::from_secs(61));
        let read: Option<i64> = f.manager.get_item("workspace:1", StorageType::Session).await;
        assert!(read.is_none());
        assert!(f.session.is_empty());

        let metrics = f.manager.metrics(StorageType::Session);
        assert_eq!(metrics.evictions, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_purged() {
        let f = fixture();
        f.session.set_item("user:1", "{broken").unwrap();

        let read: Option<Value> = f.manager.get_item("user:1", StorageType::Session).await;
        assert!(read.is_none());
        assert!(f.session.get_item("user:1").unwrap().is_none());
        assert_eq!(f.manager.metrics(StorageType::Session).misses, 1);
    }

    #[tokio::test]
    async fn test_remove_item_single_key() {
        let f = fixture();
        f.manager.set_item("a", &1, SetOptions::new()).await;
        f.manager.set_item("b", &2, SetOptions::new()).await;

        assert!(f.manager.remove_item("a", StorageType::Memory).await);
        assert!(!f.manager.remove_item("a", StorageType::Memory).await);
        assert_eq!(f.manager.get_item::<i32>("b", StorageType::Memory).await, Some(2));

        f.manager
            .set_item("user:9", &9, SetOptions::new().storage(StorageType::Session))
            .await;
        assert!(f.manager.remove_item("user:9", StorageType::Session).await);
        assert!(f.session.is_empty());
    }

    #[tokio::test]
    async fn test_clear_tier() {
        let f = fixture();
        f.manager.set_item("a", &1, SetOptions::new()).await;
        f.manager
            .set_item("user:1", &1, SetOptions::new().storage(StorageType::Session))
            .await;

        f.manager.clear(StorageType::Memory).await;
        assert_eq!(f.manager.cleanup().memory_len(), 0);
        assert_eq!(f.session.len(), 1);

        f.manager.clear(StorageType::Session).await;
        assert!(f.session.is_empty());
    }

    #[tokio::test]
    async fn test_cached_fetch_serves_cache() {
        let f = fixture();
        f.fetcher.push(Ok(FetchResponse::json_ok(&json!({"name": "Acme"}))));

        let options = FetchOptions::new().cache_key("workspace:42");
        let first: Workspace = f.manager.cached_fetch("https://api.test/ws/42", options.clone()).await.unwrap();
        let second: Workspace = f.manager.cached_fetch("https://api.test/ws/42", options).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_fetch_status_error() {
        let f = fixture();
        f.fetcher.push(Ok(FetchResponse::new(404, "")));

        let result: FetchResult<Value> = f
            .manager
            .cached_fetch("https://api.test/missing", FetchOptions::new().retries(2))
            .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(f.fetcher.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_fetch_timeout() {
        struct Hanging;

        #[async_trait::async_trait]
        impl HttpFetcher for Hanging {
            async fn fetch(&self, _request: &FetchRequest) -> FetchResult<FetchResponse> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(FetchResponse::new(200, "{}"))
            }

            fn fetcher_name(&self) -> &str {
                "hanging"
            }
        }

        let manager = CacheManager::builder()
            .with_config(CacheConfig::default().retries(1, Duration::from_millis(10)))
            .with_clock(Arc::new(ManualClock::new(0)))
            .with_fetcher(Arc::new(Hanging))
            .build()
            .unwrap();

        let result: FetchResult<Value> = manager
            .cached_fetch(
                "https://api.test/slow",
                FetchOptions::new().retries(1).timeout(Duration::from_secs(5)),
            )
            .await;
        assert!(matches!(result, Err(FetchError::Timeout(t)) if t == Duration::from_secs(5)));
    }
}
