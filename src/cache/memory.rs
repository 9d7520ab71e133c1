//! Memory Backend Module
//!
//! Process-local cache backed by a HashMap with lazy TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::backend::namespaced_key;
use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheBackend, CacheEntry, Envelope, Ttl};
use crate::error::Result;

// == Memory Cache ==
/// In-process cache backend.
///
/// Expired entries are removed by the read that observes them; there is no
/// background sweep. The lock is held for one primitive at a time.
///
/// Instances created with [`MemoryCache::scoped`] share storage, so several
/// namespaces can live in one process-wide map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    /// Namespace prefix applied to every key
    prefix: Option<String>,
    /// Key-value storage, keyed by namespaced key
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    // == Constructor ==
    /// Creates an empty MemoryCache scoped to `prefix`.
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a backend over the same storage under another prefix.
    pub fn scoped(&self, prefix: Option<String>) -> Self {
        Self {
            prefix,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Returns the configured prefix.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn key(&self, key: &str) -> String {
        namespaced_key(self.prefix.as_deref(), key)
    }

    // == Length ==
    /// Returns the number of stored entries, including expired ones not yet observed.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    // == Is Empty ==
    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    // == Get ==
    async fn get(&self, key: &str) -> Result<Option<Envelope>> {
        let key = self.key(key);
        let now = current_timestamp_ms();
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(&key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired_at(now),
        };

        if expired {
            entries.remove(&key);
            debug!("Expired entry removed: {}", key);
            return Ok(None);
        }

        Ok(entries.get(&key).map(|entry| entry.value.clone()))
    }

    // == Set ==
    async fn set(&self, key: &str, value: Envelope, ttl: Ttl) -> Result<()> {
        let entry = CacheEntry::new(value, ttl);
        self.entries.lock().await.insert(self.key(key), entry);
        Ok(())
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(&self.key(key));
        Ok(())
    }

    // == Clear ==
    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        match &self.prefix {
            None => entries.clear(),
            Some(prefix) => {
                let scope = format!("{}:", prefix);
                entries.retain(|key, _| !key.starts_with(&scope));
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
