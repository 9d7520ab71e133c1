//! Cache Client Module
//!
//! Typed, cloneable façade over a [`CacheBackend`]. This is where the
//! fail-open policy lives: backend unavailability degrades to a miss on reads
//! and a dropped write on writes, and is never returned to the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheBackend, CacheStats, Envelope, StatsRecorder, Ttl};
use crate::error::{CacheError, Result};

// == Cache ==
/// Handle to a shared cache backend.
///
/// Clones share the backend and the statistics.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Ttl,
    stats: Arc<StatsRecorder>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Cache {
    // == Constructor ==
    /// Wraps a backend. `default_ttl` is used by memoized functions that do
    /// not set their own TTL.
    pub fn new<B>(backend: B, default_ttl: Ttl) -> Self
    where
        B: CacheBackend + 'static,
    {
        Self::from_arc(Arc::new(backend), default_ttl)
    }

    /// Wraps an already shared backend.
    pub fn from_arc(backend: Arc<dyn CacheBackend>, default_ttl: Ttl) -> Self {
        Self {
            backend,
            default_ttl,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Default TTL for memoized functions.
    pub fn default_ttl(&self) -> Ttl {
        self.default_ttl
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// True when both handles share one backend instance.
    pub fn same_instance(&self, other: &Cache) -> bool {
        Arc::ptr_eq(&self.stats, &other.stats)
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // == Get ==
    /// Returns the cached value for `key`, or None on a miss.
    ///
    /// Expired, corrupt, undecodable, and unreachable entries are all misses.
    /// A stored null is a hit: `get::<Option<T>>` returns `Some(None)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let envelope = match self.backend.get(key).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!("Cache miss: {}", key);
                self.stats.record_miss();
                return None;
            }
            Err(e) => {
                self.absorb("get", key, &e);
                self.stats.record_miss();
                return None;
            }
        };

        match envelope.decode() {
            Ok(value) => {
                debug!("Cache hit: {}", key);
                self.stats.record_hit();
                Some(value)
            }
            Err(e) => {
                warn!("Cached value at {} could not be decoded: {}", key, e);
                self.stats.record_miss();
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// # Errors
    /// Returns [`CacheError::Serialization`] when the value cannot be encoded.
    /// Backend outages are logged and swallowed.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: impl Into<Ttl>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let envelope = Envelope::encode(value)?;
        self.store(key, envelope, ttl.into()).await
    }

    async fn store(&self, key: &str, envelope: Envelope, ttl: Ttl) -> Result<()> {
        match self.backend.set(key, envelope, ttl).await {
            Ok(()) => {
                debug!("Cache write: {} (ttl={:?})", key, ttl);
                self.stats.record_write();
                Ok(())
            }
            Err(e) if e.is_unavailable() => {
                self.absorb("set", key, &e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // == Delete ==
    /// Removes `key`. Missing keys and backend outages are not errors.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            self.absorb("delete", key, &e);
        }
    }

    // == Clear ==
    /// Removes every entry in this cache's namespace.
    ///
    /// Without a namespace prefix this empties the whole backend, which for
    /// a shared Redis database affects every other tenant. The Redis backend
    /// refuses that unless flushing was explicitly enabled.
    ///
    /// # Errors
    /// Returns [`CacheError::FlushRefused`] for a refused unscoped clear.
    pub async fn clear(&self) -> Result<()> {
        match self.backend.clear().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_unavailable() => {
                self.absorb("clear", "*", &e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // == Close ==
    /// Releases backend resources (e.g. the Redis connection). Call at shutdown.
    pub async fn close(&self) {
        if let Err(e) = self.backend.close().await {
            warn!("Closing {} cache failed: {}", self.backend.name(), e);
        }
    }

    // == Get Or Set ==
    /// Cache-aside read.
    ///
    /// On a hit returns the cached value without calling `loader`. On a miss
    /// awaits `loader`, stores the result with `ttl` unless it is null and
    /// `cache_none` is false, and returns it.
    ///
    /// Not atomic: concurrent misses on one key each run `loader` and the last
    /// write wins.
    ///
    /// # Errors
    /// Returns [`CacheError::Serialization`] when the loaded value cannot be
    /// encoded.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        loader: F,
        cache_none: bool,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ttl = ttl.into();
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let value = loader().await;
        self.write_back(key, &value, ttl, cache_none).await?;
        Ok(value)
    }

    /// Cache-aside read with a fallible loader.
    ///
    /// Loader errors are returned unchanged and nothing is cached for them.
    pub async fn try_get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        loader: F,
        cache_none: bool,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let ttl = ttl.into();
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.write_back(key, &value, ttl, cache_none).await?;
        Ok(value)
    }

    async fn write_back<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        cache_none: bool,
    ) -> Result<()> {
        let envelope = Envelope::encode(value)?;
        if envelope.is_null() && !cache_none {
            debug!("Not caching null result for {}", key);
            return Ok(());
        }
        self.store(key, envelope, ttl).await
    }

    fn absorb(&self, op: &str, key: &str, err: &CacheError) {
        warn!(
            "{} cache {} failed for {}, continuing without cache: {}",
            self.backend.name(),
            op,
            key,
            err
        );
        self.stats.record_failure();
    }
}
