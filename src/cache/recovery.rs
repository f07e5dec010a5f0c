//! Circuit breakers and retry for storage-tier operations.
//!
//! Every tier gets its own breaker. A storage operation is retried with
//! exponential backoff; only the final outcome is reported to the breaker.
//! Whatever happens, the caller gets either the operation's value or the
//! fallback's: storage errors never escape.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::utils::SharedClock;

use super::config::CacheConfig;
use super::storage::StorageType;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Requests flow, failures are counted
    Closed,
    /// Requests short-circuit to the fallback
    Open,
    /// One trial request is allowed through
    HalfOpen,
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Refused,
    Normal,
    Trial,
}

/// Holds a HALF_OPEN trial slot for the lifetime of the trial future
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure_ms: Option<i64>,
    trial_in_flight: bool,
}

/// Failure-isolation state machine for one storage tier
#[derive(Debug)]
pub struct CircuitBreaker {
    storage: StorageType,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(storage: StorageType, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            storage,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_ms: None,
                trial_in_flight: false,
            }),
            clock,
        }
    }

    /// Decides whether a request may run, moving OPEN to HALF_OPEN once the
    /// reset timeout has elapsed. HALF_OPEN admits one trial at a time.
    pub fn allow_request(&self) -> bool {
        self.admit() != Admission::Refused
    }

    fn admit(&self) -> Admission {
        let Ok(mut inner) = self.inner.lock() else {
            return Admission::Refused;
        };

        match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let now = self.clock.now_millis();
                let elapsed = inner
                    .last_failure_ms
                    .map(|at| now.saturating_sub(at))
                    .unwrap_or(i64::MAX);

                if elapsed >= self.config.reset_timeout.as_millis() as i64 {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("Circuit breaker for {} storage half-open, trying one request", self.storage);
                    Admission::Trial
                } else {
                    Admission::Refused
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Refused
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// Frees the HALF_OPEN slot of a trial that ended without an outcome
    fn abandon_trial(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
                inner.trial_in_flight = false;
                debug!("Trial request for {} storage abandoned", self.storage);
            }
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != CircuitState::Closed {
                info!("Circuit breaker for {} storage closed", self.storage);
            }
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.trial_in_flight = false;
        }
    }

    pub fn record_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures = inner.failures.saturating_add(1);
            inner.last_failure_ms = Some(self.clock.now_millis());
            inner.trial_in_flight = false;

            let reopen = inner.state == CircuitState::HalfOpen;
            if (reopen || inner.failures >= self.config.failure_threshold)
                && inner.state != CircuitState::Open
            {
                inner.state = CircuitState::Open;
                warn!(
                    "Circuit breaker for {} storage opened after {} failures",
                    self.storage, inner.failures
                );
            }
        }
    }

    /// Runs `operation` if the breaker allows it; any failure or a refused
    /// request yields `fallback()` instead.
    pub async fn execute<T, Op, Fut, Fb>(&self, operation: Op, fallback: Fb) -> T
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
        Fb: FnOnce() -> T,
    {
        let admission = self.admit();
        if admission == Admission::Refused {
            debug!("Circuit open for {} storage, using fallback", self.storage);
            return fallback();
        }

        // Released on drop unless an outcome is recorded first
        let mut trial = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };
        let outcome = operation().await;
        trial.armed = false;

        match outcome {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(e) => {
                warn!("{} storage operation failed: {}", self.storage, e);
                self.record_failure();
                fallback()
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Open)
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().map(|inner| inner.failures).unwrap_or(0)
    }

    /// Forces the breaker back to CLOSED
    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.last_failure_ms = None;
            inner.trial_in_flight = false;
        }
    }
}

/// Retry + circuit breaking for the three storage tiers
#[derive(Debug)]
pub struct ErrorRecoveryService {
    /// Only reached by callers that route memory work through recovery;
    /// the manager writes the LRU tier directly.
    memory: CircuitBreaker,
    session: CircuitBreaker,
    local: CircuitBreaker,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl ErrorRecoveryService {
    pub fn new(config: &CacheConfig, clock: SharedClock) -> Self {
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout,
        };
        info!(
            "Initializing ErrorRecoveryService (threshold: {}, reset: {:?}, retries: {})",
            breaker_config.failure_threshold, breaker_config.reset_timeout, config.max_retries
        );

        Self {
            memory: CircuitBreaker::new(StorageType::Memory, breaker_config, clock.clone()),
            session: CircuitBreaker::new(StorageType::Session, breaker_config, clock.clone()),
            local: CircuitBreaker::new(StorageType::Local, breaker_config, clock),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }

    /// Breaker guarding a tier
    pub fn breaker(&self, storage: StorageType) -> &CircuitBreaker {
        match storage {
            StorageType::Memory => &self.memory,
            StorageType::Session => &self.session,
            StorageType::Local => &self.local,
        }
    }

    /// Runs a storage operation with retry and circuit breaking.
    ///
    /// `operation` is called once, then up to `max_retries` more times with
    /// delays of base, 2×base, 4×base... The breaker records a single failure
    /// if every attempt fails, and `fallback()` provides the result.
    pub async fn execute_with_recovery<T, Op, Fut, Fb>(
        &self,
        storage: StorageType,
        operation: Op,
        fallback: Fb,
    ) -> T
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
        Fb: FnOnce() -> T,
    {
        self.breaker(storage)
            .execute(|| self.with_retry(storage, operation), fallback)
            .await
    }

    async fn with_retry<T, Op, Fut>(&self, storage: StorageType, mut operation: Op) -> Result<T, CacheError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let delay = self
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    debug!(
                        "Retrying {} storage operation in {:?} (attempt {}/{}): {}",
                        storage,
                        delay,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn state(&self, storage: StorageType) -> CircuitState {
        self.breaker(storage).state()
    }

    pub fn failure_count(&self, storage: StorageType) -> u32 {
        self.breaker(storage).failure_count()
    }

    pub fn reset(&self, storage: StorageType) {
        self.breaker(storage).reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(StorageType::Local, CircuitBreakerConfig::default(), clock)
    }

    fn failing() -> Result<u32, CacheError> {
        Err(CacheError::Unavailable("disk full".to_string()))
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock.clone());

        for _ in 0..5 {
            let value = breaker.execute(|| async { failing() }, || 0).await;
            assert_eq!(value, 0);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Within the reset timeout the operation never runs
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let value = breaker
                .execute(
                    || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Ok(1) }
                    },
                    || 0,
                )
                .await;
            assert_eq!(value, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock.clone());

        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Only one trial at a time
        assert!(!breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock.clone());

        for _ in 0..5 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(31));

        let value = breaker.execute(|| async { failing() }, || 7).await;
        assert_eq!(value, 7);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock);

        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig::default().retries(3, Duration::from_millis(1));
        let recovery = ErrorRecoveryService::new(&config, clock);

        let calls = AtomicU32::new(0);
        let value = recovery
            .execute_with_recovery(
                StorageType::Session,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(CacheError::Unavailable("busy".to_string()))
                        } else {
                            Ok(n)
                        }
                    }
                },
                || 99,
            )
            .await;

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recovery.failure_count(StorageType::Session), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_once() {
        let clock = Arc::new(ManualClock::new(0));
        let config = CacheConfig::default().retries(3, Duration::from_millis(1));
        let recovery = ErrorRecoveryService::new(&config, clock);

        let calls = AtomicU32::new(0);
        let value = recovery
            .execute_with_recovery(
                StorageType::Local,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { failing() }
                },
                || 42,
            )
            .await;

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(recovery.failure_count(StorageType::Local), 1);
        assert_eq!(recovery.state(StorageType::Memory), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_frees_half_open_slot() {
        let clock = Arc::new(ManualClock::new(0));
        let breaker = breaker(clock.clone());
        for _ in 0..5 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(31));

        let stalled = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute(std::future::pending::<Result<u32, CacheError>>, || 0),
        )
        .await;
        assert!(stalled.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // The slot is free again: the next request is the new trial
        let value = breaker.execute(|| async { Ok(5) }, || 0).await;
        assert_eq!(value, 5);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_during_backoff_is_readmitted() {
        let clock = Arc::new(ManualClock::new(0));
        let recovery = ErrorRecoveryService::new(&CacheConfig::default(), clock.clone());
        for _ in 0..5 {
            recovery.breaker(StorageType::Local).record_failure();
        }
        clock.advance(Duration::from_secs(31));

        // Cancelled inside the 1s backoff after the first failed attempt
        let cancelled = tokio::time::timeout(
            Duration::from_millis(500),
            recovery.execute_with_recovery(StorageType::Local, || async { failing() }, || 0),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(recovery.state(StorageType::Local), CircuitState::HalfOpen);

        clock.advance(Duration::from_secs(3600));
        let calls = AtomicU32::new(0);
        let value = recovery
            .execute_with_recovery(
                StorageType::Local,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(8) }
                },
                || 0,
            )
            .await;

        assert_eq!(value, 8);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(recovery.state(StorageType::Local), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays() {
        let clock = Arc::new(ManualClock::new(0));
        let recovery = ErrorRecoveryService::new(&CacheConfig::default(), clock);

        let started = tokio::time::Instant::now();
        let _ = recovery
            .execute_with_recovery(StorageType::Local, || async { failing() }, || 0)
            .await;

        // 1s + 2s + 4s
        assert!(started.elapsed() >= Duration::from_secs(7));
    }
}
