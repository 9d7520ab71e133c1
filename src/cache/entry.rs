//! Cache Entry Module
//!
//! Defines the TTL policy and the structure of in-memory cache entries.

use std::num::NonZeroU64;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::Envelope;

// == Ttl ==
/// Lifetime of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Kept until an explicit delete or clear
    Never,
    /// Expires this many seconds after the write
    Seconds(NonZeroU64),
}

impl Ttl {
    /// A TTL of `secs` seconds. Zero means no expiry.
    pub const fn secs(secs: u64) -> Self {
        match NonZeroU64::new(secs) {
            Some(secs) => Ttl::Seconds(secs),
            None => Ttl::Never,
        }
    }

    /// Creates a TTL from a duration, rounding down to whole seconds.
    /// Durations under one second mean no expiry, like a zero TTL.
    pub fn from_duration(duration: Duration) -> Self {
        Ttl::from(duration.as_secs())
    }

    /// Returns the expiry in seconds, or None for `Never`.
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Ttl::Never => None,
            Ttl::Seconds(secs) => Some(secs.get()),
        }
    }
}

impl From<i64> for Ttl {
    /// Non-positive values mean no expiry.
    fn from(secs: i64) -> Self {
        if secs <= 0 {
            Ttl::Never
        } else {
            Ttl::secs(secs as u64)
        }
    }
}

impl From<u64> for Ttl {
    fn from(secs: u64) -> Self {
        Ttl::secs(secs)
    }
}

impl From<i32> for Ttl {
    fn from(secs: i32) -> Self {
        Ttl::from(i64::from(secs))
    }
}

// == Cache Entry ==
/// A stored envelope plus its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value
    pub value: Envelope,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry expiring `ttl` from now.
    pub fn new(value: Envelope, ttl: Ttl) -> Self {
        let expires_at = ttl
            .as_secs()
            .map(|secs| current_timestamp_ms().saturating_add(secs.saturating_mul(1000)));

        Self { value, expires_at }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at the given instant.
    ///
    /// An entry is expired once `now` reaches its expiration time.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    /// Checks if the entry has expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired (TTL elapsed)
    /// - `Some(remaining_ms)` if the entry has TTL and hasn't expired
    /// - `None` if the entry has no TTL (never expires)
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
///
/// A clock set before the epoch reads as zero.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    fn envelope() -> Envelope {
        Envelope::Json(json!("test_value"))
    }

    #[test]
    fn test_ttl_from_non_positive_is_never() {
        assert_eq!(Ttl::from(0i64), Ttl::Never);
        assert_eq!(Ttl::from(-5i64), Ttl::Never);
        assert_eq!(Ttl::from(0u64), Ttl::Never);
        assert_eq!(Ttl::from(30), Ttl::secs(30));
        assert_eq!(Ttl::from_duration(Duration::from_millis(1500)), Ttl::secs(1));
        assert_eq!(Ttl::from_duration(Duration::from_millis(999)), Ttl::Never);
    }

    #[test]
    fn test_zero_seconds_is_never() {
        assert_eq!(Ttl::secs(0), Ttl::Never);
        assert_eq!(Ttl::secs(0).as_secs(), None);

        let entry = CacheEntry::new(envelope(), Ttl::secs(0));
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new(envelope(), Ttl::Never);

        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired());
        assert!(entry.ttl_remaining_ms().is_none());
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new(envelope(), Ttl::secs(60));

        assert!(entry.expires_at.is_some());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new(envelope(), Ttl::secs(1));

        assert!(!entry.is_expired());

        sleep(Duration::from_millis(1100));

        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining_ms(), Some(0));
    }

    #[test]
    fn test_ttl_remaining_ms() {
        let entry = CacheEntry::new(envelope(), Ttl::secs(10));

        let remaining_ms = entry.ttl_remaining_ms().unwrap();
        assert!(remaining_ms <= 10_000);
        assert!(remaining_ms >= 9_000);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            value: envelope(),
            expires_at: Some(now),
        };

        assert!(entry.is_expired_at(now), "Entry should be expired at boundary");
        assert!(!entry.is_expired_at(now - 1));
    }
}
