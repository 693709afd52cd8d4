//! Ephemeral caches, independent of the durable hierarchy.
//!
//! A cache holds JSON entries keyed by identifier, each with an absolute
//! expiry (10 seconds by default). Eviction is lazy: expired entries are
//! dropped when touched. No background expiry task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::{json, Value};

use super::error::Error;

pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Owning cache.
    pub cache: String,
    pub identifier: String,
    pub data: Value,
    /// Absolute expiry, epoch ms.
    pub valid_until: i64,
}

impl CacheEntry {
    pub fn valid(&self) -> bool {
        self.valid_until > epoch_ms()
    }
}

pub struct Cache {
    identifier: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Cache {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_lowercase(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Look an entry up. Expired entries are evicted on the spot and
    /// reported with `isValid: false` and no data.
    pub fn get(&self, identifier: &str) -> Result<Value, Error> {
        let identifier = identifier.to_lowercase();

        let entry = {
            let entries = self.entries.read();
            entries.get(&identifier).cloned()
        };

        let entry = entry.ok_or(Error::NotFound("cache entry"))?;

        if entry.valid() {
            Ok(json!({
                "isValid": true,
                "isValidUntil": entry.valid_until,
                "data": entry.data,
            }))
        } else {
            self.entries.write().remove(&identifier);
            Ok(json!({
                "isValid": false,
                "isValidUntil": entry.valid_until,
            }))
        }
    }

    /// Create or replace an entry.
    pub fn set(&self, identifier: &str, data: Value, ttl: Option<Duration>) -> CacheEntry {
        let identifier = identifier.to_lowercase();
        let entry = CacheEntry {
            cache: self.identifier.clone(),
            identifier: identifier.clone(),
            data,
            valid_until: epoch_ms() + ttl.unwrap_or(DEFAULT_TTL).as_millis() as i64,
        };

        self.entries.write().insert(identifier, entry.clone());
        entry
    }

    pub fn delete(&self, identifier: &str) -> Result<(), Error> {
        self.entries
            .write()
            .remove(&identifier.to_lowercase())
            .map(|_| ())
            .ok_or(Error::NotFound("cache entry"))
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Registry of named caches.
#[derive(Default)]
pub struct CacheStore {
    caches: RwLock<HashMap<String, Arc<Cache>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, identifier: &str) -> Result<Arc<Cache>, Error> {
        let key = identifier.to_lowercase();
        let mut caches = self.caches.write();

        if caches.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }

        let cache = Arc::new(Cache::new(&key));
        caches.insert(key, cache.clone());
        Ok(cache)
    }

    pub fn cache(&self, identifier: &str) -> Result<Arc<Cache>, Error> {
        self.caches
            .read()
            .get(&identifier.to_lowercase())
            .cloned()
            .ok_or(Error::NotFound("cache"))
    }

    pub fn delete(&self, identifier: &str) -> Result<(), Error> {
        self.caches
            .write()
            .remove(&identifier.to_lowercase())
            .map(|_| ())
            .ok_or(Error::NotFound("cache"))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let cache = Cache::new("session");
        cache.set("k1", json!({"v": 1}), None);

        let result = cache.get("k1").unwrap();
        assert_eq!(result["isValid"], true);
        assert_eq!(result["data"]["v"], 1);
        assert!(result["isValidUntil"].as_i64().unwrap() > epoch_ms());
    }

    #[test]
    fn test_expired_entry_loses_data() {
        let cache = Cache::new("session");
        cache.set("k1", json!({"v": 1}), Some(Duration::from_millis(0)));

        let result = cache.get("k1").unwrap();
        assert_eq!(result["isValid"], false);
        assert!(result.get("data").is_none());

        // Lazy eviction removed it.
        assert!(matches!(cache.get("k1"), Err(Error::NotFound(_))));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_replace_and_delete() {
        let cache = Cache::new("session");
        cache.set("k1", json!(1), None);
        cache.set("k1", json!(2), None);
        assert_eq!(cache.get("k1").unwrap()["data"], 2);

        cache.delete("k1").unwrap();
        assert!(cache.delete("k1").is_err());
    }

    #[test]
    fn test_clear() {
        let cache = Cache::new("session");
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_identifiers_case_folded() {
        let cache = Cache::new("Session");
        assert_eq!(cache.identifier(), "session");

        cache.set("Key", json!(1), None);
        assert!(cache.get("key").is_ok());
    }

    #[test]
    fn test_store() {
        let store = CacheStore::new();
        store.create("a").unwrap();
        assert!(matches!(store.create("A"), Err(Error::AlreadyExists(_))));
        assert!(store.cache("a").is_ok());

        store.delete("a").unwrap();
        assert!(store.cache("a").is_err());
    }
}
