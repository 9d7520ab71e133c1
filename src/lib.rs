//! Conf Cache - Cache-aside library for the conference platform services
//!
//! Provides an in-memory and a Redis backend behind one interface, a
//! process-wide factory, and async function memoization with stable keys.

pub mod cache;
pub mod config;
pub mod error;
pub mod memo;

pub use cache::{Cache, CacheBackend, CacheFactory, Ttl};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use memo::{memoize, memoize_in, MemoizeOptions, Memoized};
