//! Pattern-based cache invalidation.
//!
//! Scans the keys of each tier a rule applies to and removes the ones the
//! rule's pattern matches. Every removal is recorded as an eviction.

use regex::Regex;
use tracing::{debug, info, warn};

use super::manager::CacheManager;
use super::policy::InvalidationDomain;
use super::storage::StorageType;

/// Number of keys removed per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub memory: usize,
    pub session: usize,
    pub local: usize,
}

impl InvalidationReport {
    pub fn total(&self) -> usize {
        self.memory + self.session + self.local
    }

    fn add(&mut self, storage: StorageType, removed: usize) {
        match storage {
            StorageType::Memory => self.memory += removed,
            StorageType::Session => self.session += removed,
            StorageType::Local => self.local += removed,
        }
    }
}

impl CacheManager {
    /// Applies every invalidation rule of `domain`
    pub fn invalidate(&self, domain: InvalidationDomain) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for rule in self.policy().invalidation_rules(domain) {
            for storage in rule.tiers() {
                report.add(storage, self.remove_matching_in(&rule.pattern, storage));
            }
        }
        info!("Invalidated {:?}: {} entries removed", domain, report.total());
        report
    }

    /// Removes keys matching `pattern` from one tier, or from all tiers
    /// when `storage` is None
    pub fn invalidate_matching(&self, pattern: &Regex, storage: Option<StorageType>) -> usize {
        let tiers = match storage {
            Some(storage) => vec![storage],
            None => StorageType::ALL.to_vec(),
        };
        tiers
            .into_iter()
            .map(|storage| self.remove_matching_in(pattern, storage))
            .sum()
    }

    fn remove_matching_in(&self, pattern: &Regex, storage: StorageType) -> usize {
        let keys = match self.cleanup().backend(storage) {
            None => self.cleanup().memory_keys(),
            Some(backend) => match backend.keys() {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Cannot list {} keys for invalidation: {}", storage, e);
                    return 0;
                }
            },
        };

        let mut removed = 0;
        for key in keys.iter().filter(|key| pattern.is_match(key)) {
            if self.purge(key, storage) {
                debug!("Invalidated {} ({})", key, storage);
                self.monitor().record_eviction(storage);
                removed += 1;
            }
        }
        removed
    }
}
