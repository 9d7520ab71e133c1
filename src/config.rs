//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::Ttl;

// == Backend Kind ==
/// Which backend the factory constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Process-local map
    Memory,
    /// Remote Redis server
    Redis,
}

impl BackendKind {
    /// Parses a `CACHE_TYPE` value. Anything other than `memory` selects Redis.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => BackendKind::Memory,
            _ => BackendKind::Redis,
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults,
/// so the library works with zero configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Backend selector
    pub backend: BackendKind,
    /// Redis connection string
    pub redis_url: String,
    /// Namespace prefix; `None` means the whole key space
    pub prefix: Option<String>,
    /// Default TTL in seconds, `<= 0` meaning no expiry
    pub default_ttl: i64,
    /// Redis connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Redis per-command timeout in milliseconds
    pub operation_timeout_ms: u64,
    /// SCAN COUNT hint used by prefix-scoped clear
    pub scan_count: usize,
    /// Whether an unprefixed clear may issue FLUSHDB
    pub allow_flush: bool,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TYPE` - `memory` or `redis` (default: redis)
    /// - `REDIS_URL` - Connection string (default: redis://localhost:6379/0)
    /// - `CACHE_PREFIX` - Namespace prefix (default: none)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `CACHE_CONNECT_TIMEOUT_MS` - Connect timeout (default: 2000)
    /// - `CACHE_OPERATION_TIMEOUT_MS` - Command timeout (default: 1000)
    /// - `CACHE_SCAN_COUNT` - SCAN batch hint (default: 1000)
    /// - `CACHE_ALLOW_FLUSH` - Permit FLUSHDB on unprefixed clear (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing or unparseable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            backend: lookup("CACHE_TYPE")
                .map(|v| BackendKind::parse(&v))
                .unwrap_or(defaults.backend),
            redis_url: lookup("REDIS_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.redis_url),
            prefix: normalize_prefix(lookup("CACHE_PREFIX").as_deref().unwrap_or("")),
            default_ttl: parse_var(&lookup, "CACHE_DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            connect_timeout_ms: parse_var(&lookup, "CACHE_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout_ms),
            operation_timeout_ms: parse_var(&lookup, "CACHE_OPERATION_TIMEOUT_MS")
                .unwrap_or(defaults.operation_timeout_ms),
            scan_count: parse_var(&lookup, "CACHE_SCAN_COUNT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.scan_count),
            allow_flush: lookup("CACHE_ALLOW_FLUSH")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.allow_flush),
        }
    }

    /// In-memory config with the given prefix, used by tests and embedders.
    pub fn memory(prefix: &str) -> Self {
        Self {
            backend: BackendKind::Memory,
            prefix: normalize_prefix(prefix),
            ..Self::default()
        }
    }

    /// Default TTL as a [`Ttl`].
    pub fn default_ttl(&self) -> Ttl {
        Ttl::from(self.default_ttl)
    }

    /// Redis connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Redis per-command timeout.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redis,
            redis_url: "redis://localhost:6379/0".to_string(),
            prefix: None,
            default_ttl: 300,
            connect_timeout_ms: 2000,
            operation_timeout_ms: 1000,
            scan_count: 1000,
            allow_flush: false,
        }
    }
}

/// Trims a prefix and maps the empty string to `None`.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.redis_url, "redis://localhost:6379/0");
        assert!(config.prefix.is_none());
        assert_eq!(config.default_ttl, 300);
        assert!(!config.allow_flush);
    }

    #[test]
    fn test_config_empty_lookup_uses_defaults() {
        let config = CacheConfig::from_lookup(|_| None);
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.scan_count, 1000);
        assert_eq!(config.connect_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_TYPE", " Memory "),
            ("CACHE_PREFIX", "  papers "),
            ("CACHE_DEFAULT_TTL", "0"),
            ("CACHE_OPERATION_TIMEOUT_MS", "250"),
            ("CACHE_ALLOW_FLUSH", "true"),
        ]));

        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.prefix.as_deref(), Some("papers"));
        assert_eq!(config.default_ttl(), Ttl::Never);
        assert_eq!(config.operation_timeout(), Duration::from_millis(250));
        assert!(config.allow_flush);
    }

    #[test]
    fn test_config_unparseable_values_fall_back() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_DEFAULT_TTL", "soon"),
            ("CACHE_SCAN_COUNT", "0"),
            ("REDIS_URL", "   "),
        ]));

        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.scan_count, 1000);
        assert_eq!(config.redis_url, "redis://localhost:6379/0");
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("memory"), BackendKind::Memory);
        assert_eq!(BackendKind::parse("redis"), BackendKind::Redis);
        assert_eq!(BackendKind::parse("memcached"), BackendKind::Redis);
    }

    #[test]
    fn test_memory_config_blank_prefix() {
        let config = CacheConfig::memory("  ");
        assert_eq!(config.backend, BackendKind::Memory);
        assert!(config.prefix.is_none());
    }
}
