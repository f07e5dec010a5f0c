//! Per-tier cache telemetry: hits, misses, evictions, size and latency.
//!
//! Purely observational. Latency samples are kept in a bounded ring buffer
//! per tier so a long-lived process does not grow without limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

use super::storage::StorageType;

/// Latency summary in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub average: f64,
    pub p95: f64,
}

/// Metrics snapshot for one tier
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub latency: LatencyStats,
}

impl CacheMetrics {
    /// Calculates hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Returns total requests (hits + misses)
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: u64,
    misses: u64,
    evictions: u64,
    size: usize,
    latencies: VecDeque<f64>,
}

/// Telemetry recorder shared by the cache services
#[derive(Debug)]
pub struct CacheMonitor {
    tiers: Mutex<HashMap<StorageType, TierCounters>>,
    max_samples: usize,
}

impl CacheMonitor {
    pub fn new(max_samples: usize) -> Self {
        Self {
            tiers: Mutex::new(HashMap::new()),
            max_samples: max_samples.max(1),
        }
    }

    fn with_tier(&self, storage: StorageType, f: impl FnOnce(&mut TierCounters)) {
        if let Ok(mut tiers) = self.tiers.lock() {
            f(tiers.entry(storage).or_default());
        }
    }

    pub fn record_hit(&self, storage: StorageType, latency_ms: f64) {
        let max_samples = self.max_samples;
        self.with_tier(storage, |t| {
            t.hits += 1;
            if t.latencies.len() == max_samples {
                t.latencies.pop_front();
            }
            t.latencies.push_back(latency_ms);
        });
    }

    pub fn record_miss(&self, storage: StorageType) {
        self.with_tier(storage, |t| t.misses += 1);
    }

    pub fn record_eviction(&self, storage: StorageType) {
        self.with_tier(storage, |t| t.evictions += 1);
    }

    pub fn update_size(&self, storage: StorageType, size: usize) {
        self.with_tier(storage, |t| t.size = size);
    }

    /// Returns a snapshot of a tier's metrics
    pub fn get_metrics(&self, storage: StorageType) -> CacheMetrics {
        let tiers = match self.tiers.lock() {
            Ok(t) => t,
            Err(_) => return CacheMetrics::default(),
        };
        match tiers.get(&storage) {
            Some(t) => CacheMetrics {
                hits: t.hits,
                misses: t.misses,
                evictions: t.evictions,
                size: t.size,
                latency: latency_stats(&t.latencies),
            },
            None => CacheMetrics::default(),
        }
    }

    /// Returns snapshots for every tier
    pub fn all_metrics(&self) -> Vec<(StorageType, CacheMetrics)> {
        StorageType::ALL
            .iter()
            .map(|storage| (*storage, self.get_metrics(*storage)))
            .collect()
    }

    /// Resets all counters and samples
    pub fn reset_metrics(&self) {
        if let Ok(mut tiers) = self.tiers.lock() {
            tiers.clear();
        }
    }
}

impl Default for CacheMonitor {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn latency_stats(samples: &VecDeque<f64>) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }

    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let average = sorted.iter().sum::<f64>() / n as f64;
    let index = ((n as f64 * 0.95).ceil() as usize).saturating_sub(1);

    LatencyStats {
        average,
        p95: sorted[index.min(n - 1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_per_tier() {
        let monitor = CacheMonitor::default();
        monitor.record_hit(StorageType::Memory, 1.0);
        monitor.record_hit(StorageType::Memory, 3.0);
        monitor.record_miss(StorageType::Memory);
        monitor.record_eviction(StorageType::Local);
        monitor.update_size(StorageType::Memory, 2);

        let memory = monitor.get_metrics(StorageType::Memory);
        assert_eq!(memory.hits, 2);
        assert_eq!(memory.misses, 1);
        assert_eq!(memory.size, 2);
        assert!((memory.latency.average - 2.0).abs() < f64::EPSILON);
        assert!((memory.hit_rate() - 2.0 / 3.0).abs() < 0.001);

        let local = monitor.get_metrics(StorageType::Local);
        assert_eq!(local.evictions, 1);
        assert_eq!(local.total_requests(), 0);
    }

    #[test]
    fn test_p95_index() {
        let monitor = CacheMonitor::default();
        // 1..=20 in reverse order; ceil(20*0.95)-1 = 18 -> 19.0
        for i in (1..=20).rev() {
            monitor.record_hit(StorageType::Session, i as f64);
        }

        let metrics = monitor.get_metrics(StorageType::Session);
        assert_eq!(metrics.latency.p95, 19.0);
        assert!((metrics.latency.average - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_p95_single_sample() {
        let monitor = CacheMonitor::default();
        monitor.record_hit(StorageType::Memory, 7.5);
        assert_eq!(monitor.get_metrics(StorageType::Memory).latency.p95, 7.5);
    }

    #[test]
    fn test_empty_latency() {
        let monitor = CacheMonitor::default();
        let metrics = monitor.get_metrics(StorageType::Local);
        assert_eq!(metrics.latency, LatencyStats::default());
        assert_eq!(metrics.hit_rate(), 0.0);
    }

    #[test]
    fn test_latency_samples_are_bounded() {
        let monitor = CacheMonitor::new(3);
        for latency in [100.0, 1.0, 2.0, 3.0] {
            monitor.record_hit(StorageType::Memory, latency);
        }

        let metrics = monitor.get_metrics(StorageType::Memory);
        assert_eq!(metrics.hits, 4);
        // The 100ms sample rolled out of the window
        assert!((metrics.latency.average - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_metrics() {
        let monitor = CacheMonitor::default();
        monitor.record_miss(StorageType::Memory);
        monitor.reset_metrics();
        assert_eq!(monitor.get_metrics(StorageType::Memory), CacheMetrics::default());
        assert_eq!(monitor.all_metrics().len(), 3);
    }
}
