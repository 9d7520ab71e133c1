//! Conf Cache probe
//!
//! Builds the cache the services would get from the current environment,
//! round-trips one key through it, and reports the outcome. Used as a
//! deployment smoke check.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conf_cache::{CacheConfig, CacheFactory};

const PROBE_KEY: &str = "probe";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Probe {
    pid: u32,
    note: String,
}

/// Startup sequence:
/// 1. Initialize tracing
/// 2. Load configuration from environment variables
/// 3. Build the configured cache
/// 4. Write, read back, and delete a probe entry
/// 5. Log statistics and release the backend
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, override with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conf_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: backend={:?}, url={}, prefix={:?}, default_ttl={}s",
        config.backend, config.redis_url, config.prefix, config.default_ttl
    );

    let cache = CacheFactory::build(&config).context("building cache")?;

    let probe = Probe {
        pid: std::process::id(),
        note: "conf_cache probe".to_string(),
    };
    cache
        .set(PROBE_KEY, &probe, 30)
        .await
        .context("encoding probe value")?;

    let read_back: Option<Probe> = cache.get(PROBE_KEY).await;
    cache.delete(PROBE_KEY).await;

    let stats = cache.stats();
    info!(
        "Probe finished: hits={}, misses={}, writes={}, failures={}",
        stats.hits, stats.misses, stats.writes, stats.failures
    );
    cache.close().await;

    match read_back {
        Some(value) if value == probe => {
            info!("{} cache is healthy", cache.backend_name());
            Ok(())
        }
        Some(_) => bail!("probe value changed in transit"),
        None => {
            warn!("{} cache did not return the probe value", cache.backend_name());
            bail!("cache unavailable (failures={})", stats.failures)
        }
    }
}
