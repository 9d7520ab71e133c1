//! Error types for the cache library
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache backends and the memoization layer.
///
/// Only `Unavailable` is a runtime condition; the façade in
/// [`crate::cache::Cache`] absorbs it. The other variants are programmer or
/// deployment mistakes and are returned to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// The backend could not be reached (connect failure, timeout, protocol error)
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// The value could not be encoded by either the JSON or the binary path
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// An unprefixed clear would flush a shared remote database
    #[error("Refusing to flush: {0}")]
    FlushRefused(String),

    /// Invalid configuration (e.g. malformed connection URL)
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    // == Classification ==
    /// Returns true for errors the façade treats as a miss or dropped write.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache library.
pub type Result<T> = std::result::Result<T, CacheError>;
