//! Factory Module
//!
//! Builds the configured backend. `build` is the dependency-injection entry
//! point; `shared` hands out one process-wide instance.

use std::sync::OnceLock;

use tracing::{info, warn};

use crate::cache::{Cache, MemoryCache, RedisCache, RedisSettings};
use crate::config::{BackendKind, CacheConfig};
use crate::error::Result;

static SHARED: OnceLock<Result<Cache>> = OnceLock::new();

/// Constructs [`Cache`] instances from configuration.
pub struct CacheFactory;

impl CacheFactory {
    // == Build ==
    /// Builds a fresh cache for `config`. Never connects; the Redis backend
    /// opens its connection on first use.
    ///
    /// # Errors
    /// Returns [`crate::error::CacheError::Config`] for a malformed Redis URL.
    pub fn build(config: &CacheConfig) -> Result<Cache> {
        let cache = match config.backend {
            BackendKind::Memory => {
                Cache::new(MemoryCache::new(config.prefix.clone()), config.default_ttl())
            }
            BackendKind::Redis => Cache::new(
                RedisCache::new(RedisSettings::from(config))?,
                config.default_ttl(),
            ),
        };

        info!(
            "Cache initialized: backend={}, prefix={}, default_ttl={:?}",
            cache.backend_name(),
            config.prefix.as_deref().unwrap_or("<none>"),
            cache.default_ttl()
        );
        Ok(cache)
    }

    // == Shared ==
    /// Returns the process-wide cache, building it from the environment on
    /// first call. Configuration is not re-read afterwards; changing it
    /// requires a restart.
    ///
    /// A build failure is kept too: every later call returns the same
    /// error without re-reading the environment.
    pub fn shared() -> Result<Cache> {
        Self::shared_in(&SHARED, CacheConfig::from_env)
    }

    fn shared_in<L>(slot: &OnceLock<Result<Cache>>, load: L) -> Result<Cache>
    where
        L: FnOnce() -> CacheConfig,
    {
        slot.get_or_init(|| {
            let built = Self::build(&load());
            if let Err(e) = &built {
                warn!("Shared cache unavailable, memoized calls will run uncached: {}", e);
            }
            built
        })
        .clone()
    }
}
