//! Storage tiers and the key/value backends behind the persistent ones.
//!
//! The memory tier is the LRU store owned by the cleanup service. The
//! session and local tiers are string key/value stores holding JSON
//! envelopes, modeled on the browser Web Storage API:
//! - [`InMemoryStorage`]: process-scoped, gone when the process exits
//! - [`FileStorage`]: persisted to a JSON file, survives restarts

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};

/// A cache storage tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Session,
    Local,
}

impl StorageType {
    /// All tiers
    pub const ALL: [StorageType; 3] = [StorageType::Memory, StorageType::Session, StorageType::Local];

    /// Tiers backed by a [`StorageBackend`]
    pub const PERSISTENT: [StorageType; 2] = [StorageType::Session, StorageType::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Memory => "memory",
            StorageType::Session => "session",
            StorageType::Local => "local",
        }
    }

    /// Whether this tier outlives the in-process memory cache
    pub fn is_persistent(&self) -> bool {
        !matches!(self, StorageType::Memory)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StorageType::Memory),
            "session" | "sessionstorage" => Ok(StorageType::Session),
            "local" | "localstorage" => Ok(StorageType::Local),
            other => Err(format!("Unknown storage type: {}", other)),
        }
    }
}

/// String key/value store behind a persistent tier
pub trait StorageBackend: Send + Sync {
    /// Reads a raw value
    fn get_item(&self, key: &str) -> CacheResult<Option<String>>;

    /// Writes a raw value
    fn set_item(&self, key: &str, value: &str) -> CacheResult<()>;

    /// Removes a key (no-op if absent)
    fn remove_item(&self, key: &str) -> CacheResult<()>;

    /// Lists stored keys
    fn keys(&self) -> CacheResult<Vec<String>>;

    /// Removes every key
    fn clear(&self) -> CacheResult<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

fn poisoned(name: &str) -> CacheError {
    CacheError::Poisoned(format!("{} storage lock", name))
}

fn used_bytes(items: &HashMap<String, String>) -> usize {
    items.iter().map(|(k, v)| k.len() + v.len()).sum()
}

fn check_quota(
    name: &str,
    items: &HashMap<String, String>,
    key: &str,
    value: &str,
    quota: Option<usize>,
) -> CacheResult<()> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let replaced = items.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    let used = used_bytes(items) - replaced + key.len() + value.len();
    if used > quota {
        return Err(CacheError::QuotaExceeded {
            tier: name.to_string(),
            used,
            quota,
        });
    }
    Ok(())
}

/// Process-scoped key/value store with an optional byte quota
pub struct InMemoryStorage {
    name: String,
    items: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl InMemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: RwLock::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    /// Limits total key + value bytes; writes past it fail with `QuotaExceeded`
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.items.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for InMemoryStorage {
    fn get_item(&self, key: &str) -> CacheResult<Option<String>> {
        let items = self.items.read().map_err(|_| poisoned(&self.name))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut items = self.items.write().map_err(|_| poisoned(&self.name))?;
        check_quota(&self.name, &items, key, value, self.quota_bytes)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> CacheResult<()> {
        let mut items = self.items.write().map_err(|_| poisoned(&self.name))?;
        items.remove(key);
        Ok(())
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        let items = self.items.read().map_err(|_| poisoned(&self.name))?;
        Ok(items.keys().cloned().collect())
    }

    fn clear(&self) -> CacheResult<()> {
        let mut items = self.items.write().map_err(|_| poisoned(&self.name))?;
        items.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Key/value store persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file through a temporary sibling and a
/// rename, so a crash leaves either the old or the new snapshot.
pub struct FileStorage {
    name: String,
    path: PathBuf,
    items: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl FileStorage {
    /// Opens (or creates) the store at `path`.
    ///
    /// A corrupt file is logged and replaced by an empty store.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let items = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Discarding corrupt local storage file {:?}: {}", path, e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Opened local storage at {:?} with {} keys", path, items.len());

        Ok(Self {
            name: "local".to_string(),
            path,
            items: RwLock::new(items),
            quota_bytes: None,
        })
    }

    /// Limits total key + value bytes
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &HashMap<String, String>) -> CacheResult<()> {
        let raw = serde_json::to_string(items)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> CacheResult<Option<String>> {
        let items = self.items.read().map_err(|_| poisoned(&self.name))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> CacheResult<()> {
        let mut items = self.items.write().map_err(|_| poisoned(&self.name))?;
        check_quota(&self.name, &items, key, value, self.quota_bytes)?;
        let previous = items.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&items) {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => items.insert(key.to_string(), old),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> CacheResult<()> {
        let mut items = self.items.write().map_err(|_| poisoned(&self.name))?;
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        let items = self.items.read().map_err(|_| poisoned(&self.name))?;
        Ok(items.keys().cloned().collect())
    }

    fn clear(&self) -> CacheResult<()> {
        let mut items = self.items.write().map_err(|_| poisoned(&self.name))?;
        items.clear();
        self.persist(&items)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_parsing() {
        assert_eq!("memory".parse::<StorageType>().unwrap(), StorageType::Memory);
        assert_eq!("sessionStorage".parse::<StorageType>().unwrap(), StorageType::Session);
        assert_eq!("LOCAL".parse::<StorageType>().unwrap(), StorageType::Local);
        assert!("disk".parse::<StorageType>().is_err());
    }

    #[test]
    fn test_storage_type_serde() {
        let json = serde_json::to_string(&StorageType::Session).unwrap();
        assert_eq!(json, "\"session\"");
        assert!(StorageType::Local.is_persistent());
        assert!(!StorageType::Memory.is_persistent());
    }

    #[test]
    fn test_in_memory_storage_basic() {
        let storage = InMemoryStorage::new("session");
        assert!(storage.is_empty());

        storage.set_item("a", "1").unwrap();
        assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));
        assert_eq!(storage.keys().unwrap(), vec!["a".to_string()]);

        storage.remove_item("a").unwrap();
        assert_eq!(storage.get_item("a").unwrap(), None);
    }

    #[test]
    fn test_quota_exceeded() {
        let storage = InMemoryStorage::new("session").with_quota(10);
        storage.set_item("k", "12345").unwrap();

        let err = storage.set_item("k2", "123456789").unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));

        // Replacing an existing value only counts the difference
        storage.set_item("k", "123456789").unwrap();
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("local.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set_item("workspace:42", "{\"value\":1}").unwrap();
            storage.set_item("tmp", "x").unwrap();
            storage.remove_item("tmp").unwrap();
        }

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(
            reopened.get_item("workspace:42").unwrap().as_deref(),
            Some("{\"value\":1}")
        );
        assert_eq!(reopened.get_item("tmp").unwrap(), None);

        reopened.clear().unwrap();
        let cleared = FileStorage::open(&path).unwrap();
        assert!(cleared.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_storage_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        fs::write(&path, "{{{ not json").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert!(storage.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_storage_quota_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("local.json"))
            .unwrap()
            .with_quota(8);

        assert!(storage.set_item("key", "too long value").is_err());
        assert_eq!(storage.get_item("key").unwrap(), None);
    }
}
