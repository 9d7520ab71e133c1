//! Redis Backend Module
//!
//! Cache backend on a remote Redis server. Values are stored as JSON envelope
//! strings; every call is bounded by a timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as SyncMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::backend::namespaced_key;
use crate::cache::{CacheBackend, Envelope, Ttl};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Redis Settings ==
/// Connection and behaviour settings for [`RedisCache`].
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// Connection URL (e.g. "redis://localhost:6379/0")
    pub url: String,
    /// Namespace prefix applied to every key
    pub prefix: Option<String>,
    /// Bound on establishing the connection
    pub connect_timeout: Duration,
    /// Bound on each command round-trip
    pub operation_timeout: Duration,
    /// COUNT hint for SCAN during prefix clear
    pub scan_count: usize,
    /// Permit FLUSHDB when clearing without a prefix
    pub allow_flush: bool,
}

impl From<&CacheConfig> for RedisSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            url: config.redis_url.clone(),
            prefix: config.prefix.clone(),
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            scan_count: config.scan_count,
            allow_flush: config.allow_flush,
        }
    }
}

// == Redis Cache ==
/// Redis-backed cache.
///
/// The connection is opened on first use and shared by all callers. Only one
/// connect attempt runs at a time, and waiting for it counts against the
/// caller's connect timeout. A connection that fails with an I/O error or a
/// timeout is discarded so the next call reconnects.
pub struct RedisCache {
    client: Client,
    settings: RedisSettings,
    /// Current connection, tagged with the generation that opened it
    slot: SyncMutex<Option<(u64, MultiplexedConnection)>>,
    /// Serializes connect attempts
    connecting: Mutex<()>,
    generation: AtomicU64,
}

impl RedisCache {
    // == Constructor ==
    /// Creates a RedisCache. Validates the URL; does not connect.
    pub fn new(settings: RedisSettings) -> Result<Self> {
        let client = Client::open(settings.url.as_str())
            .map_err(|e| CacheError::Config(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            settings,
            slot: SyncMutex::new(None),
            connecting: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// Returns the configured prefix.
    pub fn prefix(&self) -> Option<&str> {
        self.settings.prefix.as_deref()
    }

    fn key(&self, key: &str) -> String {
        namespaced_key(self.settings.prefix.as_deref(), key)
    }

    /// Glob matching every key under the prefix. Glob metacharacters in the
    /// prefix are escaped so they match only themselves.
    fn scan_pattern(prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 2);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(":*");
        pattern
    }

    // == Connection ==
    fn current(&self) -> Option<(u64, MultiplexedConnection)> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a handle to the shared connection, opening it if needed.
    async fn connection(&self) -> Result<(u64, MultiplexedConnection)> {
        if let Some(lease) = self.current() {
            return Ok(lease);
        }

        let limit = self.settings.connect_timeout;
        tokio::time::timeout(limit, self.open())
            .await
            .map_err(|_| CacheError::Unavailable(format!("connect timed out after {:?}", limit)))?
    }

    async fn open(&self) -> Result<(u64, MultiplexedConnection)> {
        let _gate = self.connecting.lock().await;
        // Another caller may have connected while we waited.
        if let Some(lease) = self.current() {
            return Ok(lease);
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((generation, conn.clone()));

        info!("Connected to Redis at {} (connection #{})", self.settings.url, generation);
        Ok((generation, conn))
    }

    /// Forgets connection `generation` unless it was already replaced.
    fn discard(&self, generation: u64) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
            *slot = None;
            warn!(
                "Discarded Redis connection #{} to {}, next call reconnects",
                generation, self.settings.url
            );
        }
    }

    /// Runs one command future under the operation timeout.
    async fn bounded<T, F>(&self, generation: u64, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.settings.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if is_connection_fault(&e) {
                    self.discard(generation);
                }
                Err(CacheError::from(e))
            }
            Err(_) => {
                self.discard(generation);
                Err(CacheError::Unavailable(format!(
                    "{} timed out after {:?}",
                    op, self.settings.operation_timeout
                )))
            }
        }
    }

    // == Prefix Clear ==
    /// SCANs for keys under `prefix` and deletes them batch by batch.
    async fn clear_prefix(&self, prefix: &str) -> Result<usize> {
        let (generation, mut conn) = self.connection().await?;
        let pattern = Self::scan_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.settings.scan_count);
            let (next, keys): (u64, Vec<String>) =
                self.bounded(generation, "SCAN", scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let _: () = self.bounded(generation, "DEL", conn.del(&keys)).await?;
                removed += keys.len();
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

/// Errors after which the connection cannot be trusted.
fn is_connection_fault(err: &RedisError) -> bool {
    err.is_io_error() || err.is_unrecoverable_error()
}

#[async_trait]
impl CacheBackend for RedisCache {
    // == Get ==
    async fn get(&self, key: &str) -> Result<Option<Envelope>> {
        let key = self.key(key);
        let (generation, mut conn) = self.connection().await?;
        let raw: Option<String> = self.bounded(generation, "GET", conn.get(&key)).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match Envelope::from_wire(&raw) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                warn!("Unreadable entry at {} treated as miss: {}", key, e);
                Ok(None)
            }
        }
    }

    // == Set ==
    async fn set(&self, key: &str, value: Envelope, ttl: Ttl) -> Result<()> {
        let key = self.key(key);
        let raw = value.to_wire()?;
        let (generation, mut conn) = self.connection().await?;

        match ttl {
            Ttl::Seconds(secs) => {
                let _: () = self
                    .bounded(generation, "SET EX", conn.set_ex(&key, raw, secs.get()))
                    .await?;
            }
            Ttl::Never => {
                let _: () = self.bounded(generation, "SET", conn.set(&key, raw)).await?;
            }
        }
        Ok(())
    }

    // == Delete ==
    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.key(key);
        let (generation, mut conn) = self.connection().await?;
        let _: () = self.bounded(generation, "DEL", conn.del(&key)).await?;
        Ok(())
    }

    // == Clear ==
    async fn clear(&self) -> Result<()> {
        match self.settings.prefix.as_deref() {
            Some(prefix) => {
                let removed = self.clear_prefix(prefix).await?;
                debug!("Cleared {} keys under prefix {}", removed, prefix);
                Ok(())
            }
            None if self.settings.allow_flush => {
                let (generation, mut conn) = self.connection().await?;
                warn!("Flushing Redis database at {}", self.settings.url);
                let _: () = self
                    .bounded(generation, "FLUSHDB", redis::cmd("FLUSHDB").query_async(&mut conn))
                    .await?;
                Ok(())
            }
            None => Err(CacheError::FlushRefused(
                "no prefix configured; set CACHE_ALLOW_FLUSH to permit FLUSHDB".to_string(),
            )),
        }
    }

    // == Close ==
    async fn close(&self) -> Result<()> {
        let taken = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if taken.is_some() {
            info!("Closed Redis connection to {}", self.settings.url);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
