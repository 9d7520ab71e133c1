//! Backend Module
//!
//! The storage contract every cache backend implements.

use async_trait::async_trait;

use crate::cache::{Envelope, Ttl};
use crate::error::Result;

/// Storage strategy behind a [`crate::cache::Cache`].
///
/// Keys passed in are logical keys; a backend configured with a namespace
/// prefix stores them as `"{prefix}:{key}"`. Implementations report I/O
/// trouble as [`crate::error::CacheError::Unavailable`] and leave the
/// fail-open decision to the façade.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored envelope if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Envelope>>;

    /// Stores an envelope, replacing any existing entry.
    async fn set(&self, key: &str, value: Envelope, ttl: Ttl) -> Result<()>;

    /// Removes an entry. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every entry under this backend's prefix, or everything when
    /// no prefix is configured.
    async fn clear(&self) -> Result<()>;

    /// Releases held resources. Later calls may reopen them.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short label used in log lines.
    fn name(&self) -> &'static str;
}

/// Joins a namespace prefix and a logical key.
pub fn namespaced_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}:{}", prefix, key),
        None => key.to_string(),
    }
}
