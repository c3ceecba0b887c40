//! `MetadataKv`: the durable per-path metadata store the pipeline reads and
//! writes through. §1 calls the backing store "external", but its contract
//! (a Redis hash keyed by source path, per the leader-info `redisUrl`
//! field) is fully specified, so it gets a real trait boundary plus both a
//! production (`RedisMetadataKv`) and in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::{CatalogError, Result};
use crate::meta::MetaRecord;

const HASH_KEY: &str = "catalog:meta";

#[async_trait]
pub trait MetadataKv: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<MetaRecord>>;
    async fn put(&self, path: &str, record: &MetaRecord) -> Result<()>;
    async fn remove(&self, path: &str) -> Result<()>;
    /// Enumerate the whole store — used by the orchestrator's boot-time VFS
    /// rebuild (§5).
    async fn scan(&self) -> Result<Vec<(String, MetaRecord)>>;
}

pub struct RedisMetadataKv {
    client: redis::Client,
}

impl RedisMetadataKv {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CatalogError::InvalidConfig(format!("invalid redis url: {e}")))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))
    }
}

#[async_trait]
impl MetadataKv for RedisMetadataKv {
    async fn get(&self, path: &str) -> Result<Option<MetaRecord>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> =
            conn.hget(HASH_KEY, path).await.map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| CatalogError::MalformedMeta {
            path: path.into(),
            reason: e.to_string(),
        }))
        .transpose()
    }

    async fn put(&self, path: &str, record: &MetaRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let raw = serde_json::to_string(record)
            .map_err(|e| CatalogError::MalformedMeta { path: path.into(), reason: e.to_string() })?;
        conn.hset::<_, _, _, ()>(HASH_KEY, path, raw)
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.hdel::<_, _, ()>(HASH_KEY, path).await.map_err(|e| CatalogError::TransientIo(e.to_string()))
    }

    async fn scan(&self) -> Result<Vec<(String, MetaRecord)>> {
        let mut conn = self.conn().await?;
        let all: HashMap<String, String> =
            conn.hgetall(HASH_KEY).await.map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        all.into_iter()
            .map(|(path, raw)| {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| CatalogError::MalformedMeta { path: path.clone().into(), reason: e.to_string() })?;
                Ok((path, record))
            })
            .collect()
    }
}

/// Test double / single-process fallback — never used when a real
/// `redisUrl` is configured, but keeps the pipeline runnable without Redis
/// for integration tests.
#[derive(Default)]
pub struct InMemoryMetadataKv {
    entries: RwLock<HashMap<String, MetaRecord>>,
}

#[async_trait]
impl MetadataKv for InMemoryMetadataKv {
    async fn get(&self, path: &str) -> Result<Option<MetaRecord>> {
        Ok(self.entries.read().unwrap().get(path).cloned())
    }

    async fn put(&self, path: &str, record: &MetaRecord) -> Result<()> {
        self.entries.write().unwrap().insert(path.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.entries.write().unwrap().remove(path);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<(String, MetaRecord)>> {
        Ok(self.entries.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::FileKind;
    use std::path::PathBuf;

    #[tokio::test]
    async fn in_memory_kv_round_trips() {
        let kv = InMemoryMetadataKv::default();
        let record = MetaRecord::new(PathBuf::from("/a.mkv"), FileKind::Video);
        kv.put("a.mkv", &record).await.unwrap();
        assert!(kv.get("a.mkv").await.unwrap().is_some());
        kv.remove("a.mkv").await.unwrap();
        assert!(kv.get("a.mkv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_enumerates_every_entry() {
        let kv = InMemoryMetadataKv::default();
        kv.put("a.mkv", &MetaRecord::new(PathBuf::from("/a.mkv"), FileKind::Video)).await.unwrap();
        kv.put("b.mkv", &MetaRecord::new(PathBuf::from("/b.mkv"), FileKind::Video)).await.unwrap();
        assert_eq!(kv.scan().await.unwrap().len(), 2);
    }
}
