//! Network speed service.
//!
//! Classifies connection quality from the reported effective connection
//! type, downlink and a time-decayed RTT average, and turns that into cache
//! hints: how long to cache, how long to wait for a request, and whether
//! durable storage should be preferred.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::utils::SharedClock;

/// Width of the RTT sample window
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(300);

/// Per-window decay applied to older samples
pub const DECAY_FACTOR: f64 = 0.95;

pub const MIN_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const MAX_TIMEOUT: Duration = Duration::from_millis(30_000);

const SLOW_DOWNLINK_MBPS: f64 = 1.5;
const MEDIUM_DOWNLINK_MBPS: f64 = 4.0;
const SLOW_RTT_MS: f64 = 2000.0;
const MEDIUM_RTT_MS: f64 = 1000.0;

/// Coarse connection class reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "unknown")]
    Unknown,
}

impl EffectiveType {
    /// How much an RTT sample taken on this connection class is trusted
    pub fn reliability_weight(&self) -> f64 {
        match self {
            EffectiveType::FourG => 1.0,
            EffectiveType::ThreeG => 0.8,
            EffectiveType::TwoG => 0.6,
            EffectiveType::Slow2g => 0.4,
            EffectiveType::Unknown => 0.7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveType::Slow2g => "slow-2g",
            EffectiveType::TwoG => "2g",
            EffectiveType::ThreeG => "3g",
            EffectiveType::FourG => "4g",
            EffectiveType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EffectiveType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "slow-2g" => EffectiveType::Slow2g,
            "2g" => EffectiveType::TwoG,
            "3g" => EffectiveType::ThreeG,
            "4g" => EffectiveType::FourG,
            _ => EffectiveType::Unknown,
        })
    }
}

/// Snapshot of the platform's connection information
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub effective_type: EffectiveType,
    pub downlink_mbps: f64,
    pub rtt_ms: f64,
    pub save_data: bool,
}

impl Default for ConnectionInfo {
    /// Assumed when the platform exposes no connection information
    fn default() -> Self {
        Self {
            effective_type: EffectiveType::FourG,
            downlink_mbps: 10.0,
            rtt_ms: 50.0,
            save_data: false,
        }
    }
}

impl ConnectionInfo {
    pub fn new(effective_type: EffectiveType, downlink_mbps: f64, rtt_ms: f64) -> Self {
        Self {
            effective_type,
            downlink_mbps,
            rtt_ms,
            save_data: false,
        }
    }

    pub fn with_save_data(mut self, save_data: bool) -> Self {
        self.save_data = save_data;
        self
    }
}

/// Network quality class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkCondition {
    Slow,
    Medium,
    Fast,
}

impl NetworkCondition {
    /// Cache lifetime for data fetched under this condition
    pub fn cache_time(&self) -> Duration {
        match self {
            NetworkCondition::Slow => Duration::from_secs(300),
            NetworkCondition::Medium => Duration::from_secs(180),
            NetworkCondition::Fast => Duration::from_secs(60),
        }
    }

    fn timeout_multiplier(&self) -> f64 {
        match self {
            NetworkCondition::Slow => 5.0,
            NetworkCondition::Medium => 4.0,
            NetworkCondition::Fast => 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RttSample {
    rtt_ms: f64,
    timestamp_ms: i64,
    effective_type: EffectiveType,
}

#[derive(Debug, Default)]
struct NetworkState {
    connection: Option<ConnectionInfo>,
    samples: VecDeque<RttSample>,
}

impl NetworkState {
    fn prune(&mut self, now: i64) {
        let window = SAMPLE_WINDOW.as_millis() as i64;
        while let Some(front) = self.samples.front() {
            if now - front.timestamp_ms > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Connection-quality tracker and cache policy advisor
#[derive(Debug)]
pub struct NetworkSpeedService {
    state: RwLock<NetworkState>,
    clock: SharedClock,
}

impl NetworkSpeedService {
    /// Creates a service with no connection information yet
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(NetworkState::default()),
            clock,
        }
    }

    /// Creates a service seeded with a connection snapshot
    pub fn with_connection(info: ConnectionInfo, clock: SharedClock) -> Self {
        let service = Self::new(clock);
        service.update_connection(info);
        service
    }

    /// Handles a connection-change notification
    pub fn update_connection(&self, info: ConnectionInfo) {
        let now = self.clock.now_millis();
        if let Ok(mut state) = self.state.write() {
            state.connection = Some(info);
            state.samples.push_back(RttSample {
                rtt_ms: info.rtt_ms,
                timestamp_ms: now,
                effective_type: info.effective_type,
            });
            state.prune(now);
        }
        debug!(
            "Connection changed: {} ({} Mbps, {}ms RTT)",
            info.effective_type, info.downlink_mbps, info.rtt_ms
        );
    }

    /// Adds a measured RTT on the current connection
    pub fn record_rtt_sample(&self, rtt_ms: f64) {
        let now = self.clock.now_millis();
        if let Ok(mut state) = self.state.write() {
            let effective_type = state
                .connection
                .map(|c| c.effective_type)
                .unwrap_or(EffectiveType::Unknown);
            state.samples.push_back(RttSample {
                rtt_ms,
                timestamp_ms: now,
                effective_type,
            });
            state.prune(now);
        }
    }

    /// Current connection, or the 4g default when none was ever reported
    pub fn connection(&self) -> ConnectionInfo {
        self.state
            .read()
            .ok()
            .and_then(|s| s.connection)
            .unwrap_or_default()
    }

    /// Number of samples inside the window
    pub fn sample_count(&self) -> usize {
        let now = self.clock.now_millis();
        let window = SAMPLE_WINDOW.as_millis() as i64;
        self.state
            .read()
            .map(|s| s.samples.iter().filter(|x| now - x.timestamp_ms <= window).count())
            .unwrap_or(0)
    }

    /// Time-decayed, reliability-weighted RTT over the window.
    ///
    /// With fewer than two samples the latest one (or the connection's
    /// reported RTT) is used as is.
    pub fn weighted_rtt(&self) -> f64 {
        let now = self.clock.now_millis();
        let window_ms = SAMPLE_WINDOW.as_millis() as f64;

        let Ok(state) = self.state.read() else {
            return ConnectionInfo::default().rtt_ms;
        };

        let samples: Vec<&RttSample> = state
            .samples
            .iter()
            .filter(|s| (now - s.timestamp_ms) as f64 <= window_ms)
            .collect();

        if samples.len() < 2 {
            return samples
                .last()
                .map(|s| s.rtt_ms)
                .unwrap_or_else(|| state.connection.unwrap_or_default().rtt_ms);
        }

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for sample in samples {
            let age = ((now - sample.timestamp_ms).max(0) as f64) / window_ms;
            let weight = DECAY_FACTOR.powf(age) * sample.effective_type.reliability_weight();
            weighted_sum += sample.rtt_ms * weight;
            weight_sum += weight;
        }

        if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            state.connection.unwrap_or_default().rtt_ms
        }
    }

    pub fn network_condition(&self) -> NetworkCondition {
        let connection = self.connection();
        let rtt = self.weighted_rtt();

        let condition = if matches!(
            connection.effective_type,
            EffectiveType::TwoG | EffectiveType::Slow2g
        ) || connection.downlink_mbps <= SLOW_DOWNLINK_MBPS
            || rtt >= SLOW_RTT_MS
        {
            NetworkCondition::Slow
        } else if connection.effective_type == EffectiveType::ThreeG
            || connection.downlink_mbps <= MEDIUM_DOWNLINK_MBPS
            || rtt >= MEDIUM_RTT_MS
        {
            NetworkCondition::Medium
        } else {
            NetworkCondition::Fast
        };

        debug!("Network condition: {:?} (weighted RTT {:.0}ms)", condition, rtt);
        condition
    }

    /// Cache lifetime suited to the current condition (300/180/60s)
    pub fn optimal_cache_time(&self) -> Duration {
        self.network_condition().cache_time()
    }

    /// Request timeout: weighted RTT times 5/4/3, clamped to [5s, 30s]
    pub fn optimal_timeout(&self) -> Duration {
        let condition = self.network_condition();
        let millis = self.weighted_rtt() * condition.timeout_multiplier();
        let clamped = millis.clamp(
            MIN_TIMEOUT.as_millis() as f64,
            MAX_TIMEOUT.as_millis() as f64,
        );
        Duration::from_millis(clamped as u64)
    }

    /// Whether durable storage should be preferred over memory
    pub fn should_use_persistent_cache(&self) -> bool {
        self.connection().save_data || self.network_condition() == NetworkCondition::Slow
    }

    /// Listens for connection changes until the sender is dropped
    pub fn watch_connection(
        self: Arc<Self>,
        mut changes: watch::Receiver<ConnectionInfo>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let initial = *changes.borrow_and_update();
            self.update_connection(initial);
            info!("Watching connection changes (initial: {})", initial.effective_type);

            while changes.changed().await.is_ok() {
                let info = *changes.borrow_and_update();
                self.update_connection(info);
            }
            debug!("Connection change channel closed");
        })
    }
}
