//! Static cache policy: duration presets, tier rules, key prefixes and
//! invalidation patterns.
//!
//! The policy is built once at startup and shared read-only. Volatile
//! prefixes are forced into the memory tier whatever tier the caller asks
//! for; persistent prefixes are the ones expected to live in session/local.

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::storage::StorageType;

/// Named cache lifetimes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationPreset {
    /// 1 minute
    Short,
    /// 5 minutes
    #[default]
    Medium,
    /// 1 hour
    Long,
    /// 24 hours
    Day,
}

impl DurationPreset {
    pub fn as_secs(&self) -> u64 {
        match self {
            DurationPreset::Short => 60,
            DurationPreset::Medium => 300,
            DurationPreset::Long => 3600,
            DurationPreset::Day => 86_400,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// Returns the lifetime of a preset in seconds
pub fn cache_duration(preset: DurationPreset) -> u64 {
    preset.as_secs()
}

/// Entity kinds with a reserved key prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Workspace,
    Workspaces,
    User,
    Auth,
    Leads,
    Lead,
    Members,
    Tags,
    Webhooks,
    Dashboard,
    Settings,
}

impl KeyType {
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyType::Workspace => "workspace:",
            KeyType::Workspaces => "workspaces:",
            KeyType::User => "user:",
            KeyType::Auth => "auth:",
            KeyType::Leads => "leads:",
            KeyType::Lead => "lead:",
            KeyType::Members => "members:",
            KeyType::Tags => "tags:",
            KeyType::Webhooks => "webhooks:",
            KeyType::Dashboard => "dashboard:",
            KeyType::Settings => "settings:",
        }
    }
}

/// Builds `prefix + identifier`, e.g. `workspace:42`
pub fn generate_cache_key(key_type: KeyType, identifier: impl Display) -> String {
    format!("{}{}", key_type.prefix(), identifier)
}

/// Per-tier rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Longest lifetime expected in this tier
    pub max_age: Duration,

    /// Prefixes redirected to the memory tier
    pub volatile_keys: Vec<String>,

    /// Prefixes meant to be kept in this tier
    pub persistent_keys: Vec<String>,
}

impl StorageConfig {
    fn new(max_age: Duration, volatile: &[KeyType], persistent: &[KeyType]) -> Self {
        Self {
            max_age,
            volatile_keys: volatile.iter().map(|k| k.prefix().to_string()).collect(),
            persistent_keys: persistent.iter().map(|k| k.prefix().to_string()).collect(),
        }
    }
}

/// Data domains whose changes invalidate cached entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationDomain {
    Workspace,
    Auth,
    Leads,
    Members,
    Tags,
}

impl InvalidationDomain {
    pub const ALL: [InvalidationDomain; 5] = [
        InvalidationDomain::Workspace,
        InvalidationDomain::Auth,
        InvalidationDomain::Leads,
        InvalidationDomain::Members,
        InvalidationDomain::Tags,
    ];
}

/// A key pattern to purge, optionally restricted to one tier
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    pub pattern: Regex,
    pub storage: Option<StorageType>,
}

impl InvalidationRule {
    /// Compiles a rule, logging and skipping invalid patterns
    fn compile(pattern: &str, storage: Option<StorageType>) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self { pattern, storage }),
            Err(e) => {
                warn!("Skipping invalid invalidation pattern '{}': {}", pattern, e);
                None
            }
        }
    }

    /// Tiers this rule applies to
    pub fn tiers(&self) -> Vec<StorageType> {
        match self.storage {
            Some(storage) => vec![storage],
            None => StorageType::ALL.to_vec(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }
}

/// Read-only cache policy tables
#[derive(Debug, Clone)]
pub struct CachePolicy {
    memory: StorageConfig,
    session: StorageConfig,
    local: StorageConfig,
    invalidation: HashMap<InvalidationDomain, Vec<InvalidationRule>>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        use KeyType::*;

        let memory = StorageConfig::new(DurationPreset::Medium.as_duration(), &[], &[]);
        let session = StorageConfig::new(
            DurationPreset::Long.as_duration(),
            &[Leads, Lead, Members, Dashboard],
            &[Workspace, Workspaces, User, Auth, Tags],
        );
        let local = StorageConfig::new(
            DurationPreset::Day.as_duration(),
            &[Leads, Lead, Members, Dashboard, Auth, Webhooks],
            &[Workspace, Workspaces, Settings, Tags],
        );

        let table: [(InvalidationDomain, &[(&str, Option<StorageType>)]); 5] = [
            (
                InvalidationDomain::Workspace,
                &[
                    (r"^workspace:", None),
                    (r"^workspaces:", None),
                    (r"^settings:", None),
                    (r"^dashboard:", Some(StorageType::Memory)),
                ],
            ),
            (
                InvalidationDomain::Auth,
                &[
                    (r"^auth:", None),
                    (r"^user:", None),
                    (r"^workspaces:", None),
                ],
            ),
            (
                InvalidationDomain::Leads,
                &[
                    (r"^leads:", None),
                    (r"^lead:", None),
                    (r"^query:leads", Some(StorageType::Memory)),
                    (r"^dashboard:", Some(StorageType::Memory)),
                ],
            ),
            (
                InvalidationDomain::Members,
                &[
                    (r"^members:", None),
                    (r"^query:members", Some(StorageType::Memory)),
                    (r"^user:", Some(StorageType::Session)),
                ],
            ),
            (
                InvalidationDomain::Tags,
                &[
                    (r"^tags:", None),
                    (r"^leads:", Some(StorageType::Memory)),
                    (r"^query:(leads|tags)", Some(StorageType::Memory)),
                ],
            ),
        ];

        let invalidation = table
            .iter()
            .map(|(domain, rules)| {
                let compiled = rules
                    .iter()
                    .filter_map(|(pattern, storage)| InvalidationRule::compile(pattern, *storage))
                    .collect();
                (*domain, compiled)
            })
            .collect();

        Self {
            memory,
            session,
            local,
            invalidation,
        }
    }
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a volatile prefix to a tier (construction time only)
    pub fn with_volatile_key(mut self, storage: StorageType, prefix: impl Into<String>) -> Self {
        self.storage_config_mut(storage).volatile_keys.push(prefix.into());
        self
    }

    /// Adds an invalidation rule to a domain (construction time only)
    pub fn with_invalidation_rule(
        mut self,
        domain: InvalidationDomain,
        pattern: &str,
        storage: Option<StorageType>,
    ) -> Self {
        if let Some(rule) = InvalidationRule::compile(pattern, storage) {
            self.invalidation.entry(domain).or_default().push(rule);
        }
        self
    }

    /// Returns the rules of a tier
    pub fn storage_config(&self, storage: StorageType) -> &StorageConfig {
        match storage {
            StorageType::Memory => &self.memory,
            StorageType::Session => &self.session,
            StorageType::Local => &self.local,
        }
    }

    fn storage_config_mut(&mut self, storage: StorageType) -> &mut StorageConfig {
        match storage {
            StorageType::Memory => &mut self.memory,
            StorageType::Session => &mut self.session,
            StorageType::Local => &mut self.local,
        }
    }

    /// Whether `key` must bypass `storage` and live in memory
    pub fn is_volatile(&self, storage: StorageType, key: &str) -> bool {
        self.storage_config(storage)
            .volatile_keys
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }

    /// Whether `key` is expected to be kept in `storage`
    pub fn is_persistent(&self, storage: StorageType, key: &str) -> bool {
        self.storage_config(storage)
            .persistent_keys
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }

    /// Tier a write for `key` actually lands in when `requested` is asked for
    pub fn effective_storage(&self, key: &str, requested: StorageType) -> StorageType {
        if requested.is_persistent() && self.is_volatile(requested, key) {
            StorageType::Memory
        } else {
            requested
        }
    }

    /// Invalidation rules of a domain
    pub fn invalidation_rules(&self, domain: InvalidationDomain) -> &[InvalidationRule] {
        self.invalidation
            .get(&domain)
            .map(|rules| rules.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_presets() {
        assert_eq!(cache_duration(DurationPreset::Short), 60);
        assert_eq!(cache_duration(DurationPreset::Medium), 300);
        assert_eq!(cache_duration(DurationPreset::Long), 3600);
        assert_eq!(cache_duration(DurationPreset::Day), 86_400);
        assert_eq!(DurationPreset::default(), DurationPreset::Medium);
    }

    #[test]
    fn test_generate_cache_key() {
        assert_eq!(generate_cache_key(KeyType::Workspace, 42), "workspace:42");
        assert_eq!(generate_cache_key(KeyType::Leads, "ws-1"), "leads:ws-1");
    }

    #[test]
    fn test_volatile_keys_force_memory() {
        let policy = CachePolicy::default();

        assert!(policy.is_volatile(StorageType::Local, "leads:123"));
        assert_eq!(
            policy.effective_storage("leads:123", StorageType::Local),
            StorageType::Memory
        );
        assert_eq!(
            policy.effective_storage("workspace:42", StorageType::Local),
            StorageType::Local
        );
        assert_eq!(
            policy.effective_storage("leads:123", StorageType::Memory),
            StorageType::Memory
        );
    }

    #[test]
    fn test_persistent_keys() {
        let policy = CachePolicy::default();
        assert!(policy.is_persistent(StorageType::Local, "settings:theme"));
        assert!(policy.is_persistent(StorageType::Session, "user:7"));
        assert!(!policy.is_persistent(StorageType::Session, "leads:1"));
    }

    #[test]
    fn test_custom_volatile_key() {
        let policy = CachePolicy::default().with_volatile_key(StorageType::Session, "webhooks:");
        assert_eq!(
            policy.effective_storage("webhooks:9", StorageType::Session),
            StorageType::Memory
        );
    }

    #[test]
    fn test_invalidation_tables() {
        let policy = CachePolicy::default();

        for domain in InvalidationDomain::ALL {
            assert!(!policy.invalidation_rules(domain).is_empty());
        }

        let leads = policy.invalidation_rules(InvalidationDomain::Leads);
        assert!(leads.iter().any(|r| r.matches("leads:ws-1")));
        assert!(!leads.iter().any(|r| r.matches("workspace:42")));

        let memory_only = leads
            .iter()
            .find(|r| r.matches("dashboard:stats"))
            .unwrap();
        assert_eq!(memory_only.tiers(), vec![StorageType::Memory]);
    }

    #[test]
    fn test_invalid_rule_is_skipped() {
        let before = CachePolicy::default()
            .invalidation_rules(InvalidationDomain::Tags)
            .len();
        let policy =
            CachePolicy::default().with_invalidation_rule(InvalidationDomain::Tags, "([", None);
        assert_eq!(policy.invalidation_rules(InvalidationDomain::Tags).len(), before);
    }
}
