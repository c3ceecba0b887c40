//! Runtime configuration, assembled from environment variables with
//! defaults scaled off the number of available CPUs — mirrors the
//! teacher's `ScanConfig` (env/CLI layered over sane defaults).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CatalogError, Result};

/// Per-stage worker pool sizes (§4.8: validate defaults to 2×CPU, light to
/// CPU, background to max(1, CPU/2)).
#[derive(Clone, Debug)]
pub struct ConcurrencyConfig {
    pub validate: usize,
    pub light: usize,
    pub background: usize,
}

impl ConcurrencyConfig {
    pub fn from_cpus(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        Self { validate: cpus * 2, light: cpus, background: (cpus / 2).max(1) }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Base directory relative paths from the event stream are resolved against.
    pub base_path: PathBuf,
    /// Path to the leader-info file (`<base>/locks/kv-leader.info`).
    pub leader_info_path: PathBuf,
    /// Directory the HashIndex's per-algorithm CSVs live in.
    pub hash_index_dir: PathBuf,
    pub concurrency: ConcurrencyConfig,
    /// Named consumer group for the event stream.
    pub consumer_group: String,
    /// This process's consumer identity within the group.
    pub consumer_name: String,
    /// Idle threshold before a pending entry is claimed as abandoned (§4.7, §6: ~30s).
    pub pending_idle: Duration,
    /// Minimum interval between HashIndex flushes (§4.2).
    pub flush_interval: Duration,
    /// Base backoff interval for EventIngestor reconnects (§4.7).
    pub reconnect_backoff_base: Duration,
    /// TTL for the cached leader info (§6: 5s).
    pub leader_cache_ttl: Duration,
    /// Startup timeout waiting for leader info before failing fast.
    pub leader_timeout: Duration,
}

impl Config {
    /// Build a config from environment variables, falling back to
    /// CPU-scaled defaults. `CATALOG_BASE_PATH` is the only required
    /// variable; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let base_path = std::env::var("CATALOG_BASE_PATH")
            .map(PathBuf::from)
            .map_err(|_| CatalogError::InvalidConfig("CATALOG_BASE_PATH is required".into()))?;

        if base_path.as_os_str().is_empty() {
            return Err(CatalogError::InvalidConfig("CATALOG_BASE_PATH must not be empty".into()));
        }

        let leader_info_path = std::env::var("CATALOG_LEADER_INFO_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_path.join("locks").join("kv-leader.info"));

        let hash_index_dir = std::env::var("CATALOG_HASH_INDEX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_path.join("hash-index"));

        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let mut concurrency = ConcurrencyConfig::from_cpus(cpus);
        if let Ok(v) = std::env::var("CATALOG_VALIDATE_WORKERS") {
            concurrency.validate = parse_positive(&v, "CATALOG_VALIDATE_WORKERS")?;
        }
        if let Ok(v) = std::env::var("CATALOG_LIGHT_WORKERS") {
            concurrency.light = parse_positive(&v, "CATALOG_LIGHT_WORKERS")?;
        }
        if let Ok(v) = std::env::var("CATALOG_BACKGROUND_WORKERS") {
            concurrency.background = parse_positive(&v, "CATALOG_BACKGROUND_WORKERS")?;
        }

        let consumer_group =
            std::env::var("CATALOG_CONSUMER_GROUP").unwrap_or_else(|_| "catalog-pipeline".into());
        let consumer_name = std::env::var("CATALOG_CONSUMER_NAME")
            .unwrap_or_else(|_| format!("catalogd-{}", uuid::Uuid::new_v4()));

        Ok(Self {
            base_path,
            leader_info_path,
            hash_index_dir,
            concurrency,
            consumer_group,
            consumer_name,
            pending_idle: Duration::from_secs(30),
            flush_interval: Duration::from_secs(10),
            reconnect_backoff_base: Duration::from_secs(5),
            leader_cache_ttl: Duration::from_secs(5),
            leader_timeout: Duration::from_secs(30),
        })
    }
}

fn parse_positive(raw: &str, var: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CatalogError::InvalidConfig(format!("{var} must be a positive integer"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_base_path() {
        std::env::remove_var("CATALOG_BASE_PATH");
        assert!(matches!(Config::from_env(), Err(CatalogError::InvalidConfig(_))));
    }

    #[test]
    fn concurrency_scales_with_cpus() {
        let c = ConcurrencyConfig::from_cpus(4);
        assert_eq!(c.validate, 8);
        assert_eq!(c.light, 4);
        assert_eq!(c.background, 2);
    }

    #[test]
    fn background_floor_is_one() {
        let c = ConcurrencyConfig::from_cpus(1);
        assert_eq!(c.background, 1);
    }
}
