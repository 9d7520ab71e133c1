//! Cache Module
//!
//! Pluggable cache-aside storage: an in-memory backend, a Redis backend, and
//! the typed [`Cache`] façade that business code talks to.

mod backend;
mod client;
mod entry;
mod envelope;
mod factory;
mod memory;
mod redis;
mod stats;


// Re-export public types
pub use backend::{namespaced_key, CacheBackend};
pub use client::Cache;
pub use entry::{CacheEntry, Ttl};
pub use envelope::Envelope;
pub use factory::CacheFactory;
pub use memory::MemoryCache;
pub use self::redis::{RedisCache, RedisSettings};
pub use stats::{CacheStats, StatsRecorder};
