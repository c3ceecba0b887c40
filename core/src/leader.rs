//! `LeaderClient`: resolves the current pipeline leader's base URL and
//! Redis URL. §1 calls leader discovery "external", but §6 fully specifies
//! its contract — a JSON hint file refreshed by something outside this
//! process, confirmed by an HTTP health check, cached for a short TTL and
//! invalidated early when the hint file changes on disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};

/// Wire format is the leader-info file/`/urls` response from §6:
/// `apiUrl`, `redisUrl`, plus `webdavUrl`/`webdavUrlInternal`/`hostname`/
/// `timestamp`, which this crate has no consumer for and so doesn't
/// declare — serde ignores fields it doesn't know about by default.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LeaderInfo {
    #[serde(rename = "apiUrl")]
    pub base_url: String,
    #[serde(rename = "redisUrl")]
    pub redis_url: String,
}

struct Cached {
    info: LeaderInfo,
    fetched_at: Instant,
}

pub struct LeaderClient {
    info_path: PathBuf,
    ttl: Duration,
    http: reqwest::Client,
    cache: RwLock<Option<Cached>>,
    /// Held for its lifetime — dropping the watcher stops it.
    _watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl LeaderClient {
    pub fn new(info_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            info_path: info_path.into(),
            ttl,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
            _watcher: Mutex::new(None),
        }
    }

    /// Watch the hint file's parent directory so an external rewrite of the
    /// file invalidates the cache immediately instead of waiting out the
    /// TTL (mirrors the debounced directory-watch pattern elsewhere in this
    /// crate).
    pub fn watch_for_changes(self: &Arc<Self>) -> Result<()> {
        let parent = self
            .info_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let this = Arc::clone(self);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if event.paths.iter().any(|p| p == &this.info_path) {
                    debug!(path = %this.info_path.display(), "leader hint file changed, invalidating cache");
                    this.invalidate();
                }
            }
        })
        .map_err(|e| CatalogError::InvalidConfig(format!("failed to start leader-info watcher: {e}")))?;

        watcher
            .watch(parent, RecursiveMode::NonRecursive)
            .map_err(|e| CatalogError::InvalidConfig(format!("failed to watch {}: {e}", parent.display())))?;

        *self._watcher.lock().unwrap() = Some(watcher);
        Ok(())
    }

    pub fn invalidate(&self) {
        *self.cache.write().unwrap() = None;
    }

    /// Returns the cached leader info if still within TTL; otherwise reads
    /// the hint file and confirms it with a health check before caching.
    pub async fn current(&self) -> Result<LeaderInfo> {
        if let Some(cached) = self.cache.read().unwrap().as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.info.clone());
            }
        }

        let raw = tokio::fs::read_to_string(&self.info_path)
            .await
            .map_err(|e| CatalogError::TransientIo(format!("reading leader hint: {e}")))?;
        let info: LeaderInfo = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::InvalidConfig(format!("malformed leader hint: {e}")))?;

        if let Err(e) = self.confirm(&info).await {
            warn!(base_url = %info.base_url, error = %e, "leader health check failed");
            return Err(e);
        }

        *self.cache.write().unwrap() = Some(Cached { info: info.clone(), fetched_at: Instant::now() });
        Ok(info)
    }

    async fn confirm(&self, info: &LeaderInfo) -> Result<()> {
        let url = format!("{}/healthz", info.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| CatalogError::TransientIo(format!("leader health check: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(CatalogError::NoLeader)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_hint_file_is_a_transient_error() {
        let client = LeaderClient::new("/nonexistent/leader.json", Duration::from_secs(5));
        assert!(matches!(client.current().await, Err(CatalogError::TransientIo(_))));
    }

    #[tokio::test]
    async fn malformed_hint_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let client = LeaderClient::new(&path, Duration::from_secs(5));
        assert!(matches!(client.current().await, Err(CatalogError::InvalidConfig(_))));
    }

    #[test]
    fn invalidate_clears_cache() {
        let client = LeaderClient::new("/x", Duration::from_secs(5));
        *client.cache.write().unwrap() = Some(Cached {
            info: LeaderInfo { base_url: "http://x".into(), redis_url: "redis://x".into() },
            fetched_at: Instant::now(),
        });
        client.invalidate();
        assert!(client.cache.read().unwrap().is_none());
    }
}
