//! C9 — Orchestrator: wires every component together, waits for a leader
//! at boot, rebuilds the VFS from the KV store, and starts the event
//! ingestor. Owns the graceful-shutdown sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::bytes_source::{ByteSource, LocalByteSource};
use crate::config::Config;
use crate::error::{CatalogError, Result};
use crate::hashindex::HashIndex;
use crate::ingest::{EventIngestor, EventSink, FileEvent};
use crate::kv::{InMemoryMetadataKv, MetadataKv, RedisMetadataKv};
use crate::leader::LeaderClient;
use crate::pipeline::Pipeline;
use crate::plugin::{NullPluginScheduler, PluginScheduler};
use crate::state::StateTracker;
use crate::tokenizer::{DefaultTokenizer, Tokenizer};
use crate::vfs::Vfs;

/// Drain budget for in-flight jobs once the pipeline is paused before
/// shutdown flushes the hash index and returns.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    pub pipeline: Arc<Pipeline>,
    pub vfs: Arc<Vfs>,
    pub state: Arc<StateTracker>,
    pub kv: Arc<dyn MetadataKv>,
    hash_index: Arc<HashIndex>,
    ingestor: Arc<EventIngestor>,
}

struct PipelineSink {
    pipeline: Arc<Pipeline>,
}

#[async_trait::async_trait]
impl EventSink for PipelineSink {
    async fn handle(&self, event: FileEvent) -> Result<()> {
        match event {
            FileEvent::Added(path) => self.pipeline.handle_add(path.into()).await,
            FileEvent::Changed(path) => self.pipeline.handle_change(path.into()).await,
            FileEvent::Removed(path) => self.pipeline.handle_delete(path.into()).await,
            FileEvent::Renamed { .. } => {
                // `EventIngestor::dispatch` already materializes renames as
                // delete+add before a sink ever sees them.
            }
        }
        Ok(())
    }
}

impl Orchestrator {
    /// Boots the whole system: waits for a leader, opens the hash index and
    /// KV store, rebuilds the VFS from whatever the KV store already has,
    /// constructs the pipeline, and starts the event ingestor. Returns once
    /// everything is running; callers await `ingestor.run()`'s task (or
    /// call `run_ingestor`) to actually pump events.
    pub async fn boot(config: &Config) -> Result<Self> {
        let leader_client = Arc::new(LeaderClient::new(config.leader_info_path.clone(), config.leader_cache_ttl));
        leader_client.watch_for_changes()?;

        let leader = wait_for_leader(&leader_client, config.leader_timeout).await?;
        info!(base_url = %leader.base_url, "leader acquired");

        let hash_index = Arc::new(HashIndex::open(&config.hash_index_dir)?);
        let kv: Arc<dyn MetadataKv> = if leader.redis_url.is_empty() {
            Arc::new(InMemoryMetadataKv::default())
        } else {
            Arc::new(RedisMetadataKv::new(&leader.redis_url)?)
        };

        let vfs = Arc::new(Vfs::new());
        rebuild_vfs(&vfs, kv.as_ref()).await?;

        let byte_source: Arc<dyn ByteSource> = Arc::new(LocalByteSource::new(config.base_path.clone()));
        let state = Arc::new(StateTracker::new());
        let plugins: Arc<dyn PluginScheduler> = Arc::new(NullPluginScheduler);
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(DefaultTokenizer);

        let pipeline = Arc::new(Pipeline::start(
            config.concurrency.clone(),
            byte_source,
            state.clone(),
            vfs.clone(),
            hash_index.clone(),
            kv.clone(),
            plugins,
            tokenizer,
        ));

        let ingestor = Arc::new(EventIngestor::new(
            &leader.redis_url,
            "catalog:events",
            &config.consumer_group,
            &config.consumer_name,
            config.pending_idle,
        )?);

        Ok(Self { pipeline, vfs, state, kv, hash_index, ingestor })
    }

    /// Runs the event ingestor until `shutdown` resolves, then stops it and
    /// waits for the flush/close sequence. Call from a `tokio::select!`
    /// alongside the signal future in `main`.
    pub async fn run(&self, sink_pipeline: Arc<Pipeline>) -> Result<()> {
        let sink = Arc::new(PipelineSink { pipeline: sink_pipeline });
        self.ingestor.run(sink).await
    }

    /// §4.9 step 6: stop taking new events, pause the pipeline, give
    /// in-flight jobs a fixed window to finish, then flush the hash index
    /// so the next boot doesn't re-hash files this run already touched. The
    /// KV store has no persistent connection to close — every call opens
    /// its own.
    pub async fn shutdown(&self) {
        info!("shutdown requested, stopping event ingestor");
        self.ingestor.stop();
        self.pipeline.pause();
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        if let Err(e) = self.hash_index.flush() {
            warn!(error = %e, "hash index flush failed during shutdown");
        }
    }
}

async fn wait_for_leader(client: &Arc<LeaderClient>, timeout: Duration) -> Result<crate::leader::LeaderInfo> {
    let deadline = Instant::now() + timeout;
    loop {
        match client.current().await {
            Ok(info) => return Ok(info),
            Err(e) => {
                if Instant::now() >= deadline {
                    warn!(error = %e, "giving up waiting for leader");
                    return Err(CatalogError::NoLeader);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

async fn rebuild_vfs(vfs: &Arc<Vfs>, kv: &dyn MetadataKv) -> Result<()> {
    let entries = kv.scan().await?;
    let materialized = entries.into_iter().filter_map(|(path, meta)| {
        let vp = meta.virtual_path.clone()?;
        Some((vp, std::path::PathBuf::from(path), Some(meta)))
    });
    vfs.rebuild_from(materialized);
    Ok(())
}
