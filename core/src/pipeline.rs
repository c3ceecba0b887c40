//! C8 — Pipeline: three bounded-concurrency stages (validate → light →
//! background) that turn a raw file-system path into a cataloged,
//! browsable VFS entry. Each stage is its own worker pool so a slow
//! background job (dedup, sidecar writes, plugin dispatch) never backs up
//! cheap validation work.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::bytes_source::ByteSource;
use crate::config::ConcurrencyConfig;
use crate::dedup::DuplicateDetector;
use crate::digest::Algorithm;
use crate::hashindex::HashIndex;
use crate::hashkit::{midhash256, Hasher};
use crate::kv::MetadataKv;
use crate::meta::{FileKind, MetaRecord};
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::plugin::{PluginScheduler, PluginTask};
use crate::rename;
use crate::state::{StateSnapshot, StateTracker};
use crate::tokenizer::Tokenizer;
use crate::vfs::Vfs;

const QUEUE_CAPACITY: usize = 1024;

/// The set of extra digest algorithms computed in the background stage,
/// alongside the midhash256 already produced by light.
const BACKGROUND_ALGORITHMS: [Algorithm; 2] = [Algorithm::Sha256, Algorithm::Crc32];

#[derive(Debug)]
struct ValidateJob {
    path: PathBuf,
}

#[derive(Debug)]
struct LightJob {
    path: PathBuf,
    kind: FileKind,
}

#[derive(Debug)]
struct BackgroundJob {
    path: PathBuf,
    meta: MetaRecord,
}

pub struct PipelineStats {
    pub metrics: PipelineMetricsSnapshot,
    pub state: StateSnapshot,
}

/// Everything a stage worker needs; shared across every worker in every
/// stage via one `Arc`.
struct Shared {
    byte_source: Arc<dyn ByteSource>,
    state: Arc<StateTracker>,
    vfs: Arc<Vfs>,
    hash_index: Arc<HashIndex>,
    kv: Arc<dyn MetadataKv>,
    plugins: Arc<dyn PluginScheduler>,
    tokenizer: Arc<dyn Tokenizer>,
    metrics: PipelineMetrics,
    paused: AtomicBool,
    resume: Notify,
}

impl Shared {
    async fn wait_if_paused(&self) {
        while self.paused.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
    }
}

pub struct Pipeline {
    shared: Arc<Shared>,
    validate_tx: mpsc::Sender<ValidateJob>,
    light_tx: mpsc::Sender<LightJob>,
    background_tx: mpsc::Sender<BackgroundJob>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        concurrency: ConcurrencyConfig,
        byte_source: Arc<dyn ByteSource>,
        state: Arc<StateTracker>,
        vfs: Arc<Vfs>,
        hash_index: Arc<HashIndex>,
        kv: Arc<dyn MetadataKv>,
        plugins: Arc<dyn PluginScheduler>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        let shared = Arc::new(Shared {
            byte_source,
            state,
            vfs,
            hash_index,
            kv,
            plugins,
            tokenizer,
            metrics: PipelineMetrics::default(),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
        });

        let (validate_tx, validate_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (light_tx, light_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (background_tx, background_rx) = mpsc::channel(QUEUE_CAPACITY);

        spawn_validate_workers(concurrency.validate, shared.clone(), validate_rx, light_tx.clone());
        spawn_light_workers(concurrency.light, shared.clone(), light_rx, background_tx.clone());
        spawn_background_workers(concurrency.background, shared.clone(), background_rx);

        Self { shared, validate_tx, light_tx, background_tx }
    }

    pub async fn handle_add(&self, path: PathBuf) {
        self.shared.state.add_discovered(path.clone());
        let _ = self.validate_tx.send(ValidateJob { path }).await;
    }

    /// A changed file re-enters at validate so its kind and hints are
    /// re-derived; the merge against whatever's already in the KV store
    /// happens in the background stage.
    pub async fn handle_change(&self, path: PathBuf) {
        self.shared.state.add_discovered(path.clone());
        let _ = self.validate_tx.send(ValidateJob { path }).await;
    }

    pub async fn handle_delete(&self, path: PathBuf) {
        let key = path.to_string_lossy().to_string();
        if let Ok(Some(meta)) = self.shared.kv.get(&key).await {
            if let Some(vp) = &meta.virtual_path {
                self.shared.vfs.remove_file(vp);
            }
        }
        let _ = self.shared.kv.remove(&key).await;
        self.shared.state.remove(&path);
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.resume.notify_waiters();
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats { metrics: self.shared.metrics.snapshot(), state: self.shared.state.snapshot() }
    }

    /// Zeroes every stage counter. Jobs already queued in a channel still
    /// run to completion — `reset` clears accounting, not in-flight work.
    pub fn reset_metrics(&self) {
        for counters in [&self.shared.metrics.validate, &self.shared.metrics.light, &self.shared.metrics.background] {
            counters.accepted.store(0, Ordering::SeqCst);
            counters.completed.store(0, Ordering::SeqCst);
            counters.failed.store(0, Ordering::SeqCst);
            counters.retried.store(0, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    fn queue_capacities(&self) -> (usize, usize, usize) {
        (self.validate_tx.capacity(), self.light_tx.capacity(), self.background_tx.capacity())
    }
}

fn spawn_validate_workers(
    count: usize,
    shared: Arc<Shared>,
    rx: mpsc::Receiver<ValidateJob>,
    light_tx: mpsc::Sender<LightJob>,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..count.max(1) {
        let shared = shared.clone();
        let rx = rx.clone();
        let light_tx = light_tx.clone();
        tokio::spawn(async move {
            loop {
                shared.wait_if_paused().await;
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else { break };
                shared.metrics.validate.accept();
                match classify(&job.path) {
                    Some(kind) => {
                        shared.metrics.validate.complete();
                        let _ = light_tx.send(LightJob { path: job.path, kind }).await;
                    }
                    None => {
                        shared.metrics.validate.fail();
                        shared.state.remove(&job.path);
                    }
                }
            }
        });
    }
}

fn spawn_light_workers(
    count: usize,
    shared: Arc<Shared>,
    rx: mpsc::Receiver<LightJob>,
    background_tx: mpsc::Sender<BackgroundJob>,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..count.max(1) {
        let shared = shared.clone();
        let rx = rx.clone();
        let background_tx = background_tx.clone();
        tokio::spawn(async move {
            loop {
                shared.wait_if_paused().await;
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else { break };
                shared.metrics.light.accept();
                run_light_stage(&shared, job, &background_tx).await;
            }
        });
    }
}

async fn run_light_stage(shared: &Arc<Shared>, job: LightJob, background_tx: &mpsc::Sender<BackgroundJob>) {
    shared.state.start_light(&job.path);

    let size = match shared.byte_source.size(&job.path).await {
        Ok(size) => size,
        Err(e) => {
            shared.metrics.light.fail();
            shared.state.complete_light(&job.path, None, None, Some(e.to_string()));
            return;
        }
    };

    let mtime = match shared.byte_source.mtime(&job.path).await {
        Ok(mtime) => mtime,
        Err(e) => {
            shared.metrics.light.fail();
            shared.state.complete_light(&job.path, None, None, Some(e.to_string()));
            return;
        }
    };

    // §4.8 stage-2: look up the digest cache by (path, size, mtime) before
    // recomputing; record a hit/miss either way.
    let digest = match shared.hash_index.lookup(&job.path, size, mtime, Algorithm::Midhash256) {
        Some(cached) => {
            shared.metrics.hash_cache.hit();
            cached
        }
        None => {
            shared.metrics.hash_cache.miss();
            match midhash256(shared.byte_source.as_ref(), &job.path).await {
                Ok(d) => {
                    shared.hash_index.insert(&job.path, size, mtime, d.clone());
                    d
                }
                Err(e) => {
                    shared.metrics.light.fail();
                    shared.state.complete_light(&job.path, None, None, Some(e.to_string()));
                    return;
                }
            }
        }
    };

    let mut meta = MetaRecord::new(job.path.clone(), job.kind);
    meta.size_byte = Some(size);
    meta.digests.insert(Algorithm::Midhash256, digest.clone());

    if let Some(name) = job.path.file_name().and_then(|n| n.to_str()) {
        let hints = shared.tokenizer.tokenize(name);
        meta.title = hints.title;
        meta.season = hints.season;
        meta.episode = hints.episode;
        meta.year = hints.year;
        meta.language = hints.language;
    }

    match rename::rename(&meta) {
        Ok(virtual_path) => {
            meta.virtual_path = virtual_path;
            // §4.8 stage-2 "on success": insert into the VFS immediately so
            // the file is browsable within this tick; stage-3 only updates
            // the already-inserted entry's metadata.
            if let Some(vp) = &meta.virtual_path {
                shared.vfs.insert_file(vp, job.path.clone(), Some(meta.clone()));
            }
            shared.metrics.light.complete();
            shared.state.complete_light(&job.path, Some(digest), meta.virtual_path.clone(), None);
            let _ = background_tx.send(BackgroundJob { path: job.path, meta }).await;
        }
        Err(e) => {
            // No title yet — this file waits for a metadata merge via
            // `handle_change` before it can be renamed into the tree.
            shared.metrics.light.fail();
            shared.state.complete_light(&job.path, Some(digest), None, Some(e.to_string()));
        }
    }
}

fn spawn_background_workers(count: usize, shared: Arc<Shared>, rx: mpsc::Receiver<BackgroundJob>) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..count.max(1) {
        let shared = shared.clone();
        let rx = rx.clone();
        tokio::spawn(async move {
            loop {
                shared.wait_if_paused().await;
                let job = { rx.lock().await.recv().await };
                let Some(job) = job else { break };
                shared.metrics.background.accept();
                run_background_stage(&shared, job).await;
            }
        });
    }
}

async fn run_background_stage(shared: &Arc<Shared>, job: BackgroundJob) {
    shared.state.start_background(&job.path);
    let mut meta = job.meta;
    let key = job.path.to_string_lossy().to_string();

    if let Some(existing) = shared.kv.get(&key).await.ok().flatten() {
        meta.merge(existing);
    }

    for algo in BACKGROUND_ALGORITHMS {
        if let Err(e) = compute_into(shared, &job.path, algo, &mut meta).await {
            warn!(path = %job.path.display(), algo = %algo, error = %e, "background digest failed");
        }
    }

    let mut siblings = match shared.kv.scan().await {
        Ok(all) => all.into_iter().map(|(_, m)| m).collect::<Vec<_>>(),
        Err(_) => Vec::new(),
    };
    siblings.push(meta.clone());
    DuplicateDetector::detect(&mut siblings);
    meta = siblings.pop().unwrap_or(meta);

    if let Err(e) = shared.kv.put(&key, &meta).await {
        shared.metrics.background.fail();
        shared.state.complete_background(&job.path, None, None, Some(e.to_string()));
        return;
    }

    // Stage-2 already inserted this file into the VFS; stage-3 only
    // refreshes its embedded record with the background digests/dedup
    // flags, it never re-inserts.
    if let Some(vp) = &meta.virtual_path {
        shared.vfs.update_metadata(vp, meta.clone());
    }

    shared
        .plugins
        .dispatch(PluginTask { virtual_path: meta.virtual_path.clone().unwrap_or_default(), record: meta.clone() })
        .await;

    shared.metrics.background.complete();
    shared.state.complete_background(&job.path, meta.digests.get(&Algorithm::Midhash256).cloned(), meta.virtual_path.clone(), None);

    info!(path = %job.path.display(), virtual_path = ?meta.virtual_path, "cataloged");
}

async fn compute_into(
    shared: &Arc<Shared>,
    path: &Path,
    algo: Algorithm,
    meta: &mut MetaRecord,
) -> crate::error::Result<()> {
    let mut hasher = Hasher::new(algo)?;
    let bytes = shared.byte_source.read_to_end(path).await?;
    hasher.update(&bytes);
    meta.digests.insert(algo, hasher.finalize());
    Ok(())
}

/// Cheap, synchronous structural check: extension maps to a known kind, and
/// the path isn't a hidden/dotfile. Anything else is filtered out before it
/// reaches the light stage.
fn classify(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "mkv" | "mp4" | "avi" | "mov" | "m2ts" => Some(FileKind::Video),
        "srt" | "ass" | "sub" | "vtt" => Some(FileKind::Subtitle),
        "torrent" => Some(FileKind::Torrent),
        _ => Some(FileKind::Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_source::LocalByteSource;
    use crate::kv::InMemoryMetadataKv;
    use crate::plugin::NullPluginScheduler;
    use crate::tokenizer::DefaultTokenizer;
    use std::time::Duration;

    async fn test_pipeline(root: &Path) -> (Pipeline, Arc<Vfs>) {
        let hash_dir = tempfile::tempdir().unwrap();
        let vfs = Arc::new(Vfs::new());
        let pipeline = Pipeline::start(
            ConcurrencyConfig { validate: 2, light: 2, background: 2 },
            Arc::new(LocalByteSource::new(root.to_path_buf())),
            Arc::new(StateTracker::new()),
            vfs.clone(),
            Arc::new(HashIndex::open(hash_dir.path()).unwrap()),
            Arc::new(InMemoryMetadataKv::default()),
            Arc::new(NullPluginScheduler),
            Arc::new(DefaultTokenizer),
        );
        (pipeline, vfs)
    }

    #[tokio::test]
    async fn file_without_derivable_title_surfaces_as_failed_in_done() {
        let dir = tempfile::tempdir().unwrap();
        // Tokenizer strips release-tag noise words, leaving no title at
        // all — rename fails loud per §4.5.
        std::fs::write(dir.path().join("1080p.mkv"), b"hello").unwrap();
        let (pipeline, _vfs) = test_pipeline(dir.path()).await;

        pipeline.handle_add(PathBuf::from("1080p.mkv")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = pipeline.stats();
        assert_eq!(stats.state.done.len(), 1);
        assert!(stats.state.done[0].error.is_some());
    }

    #[tokio::test]
    async fn file_with_derivable_title_becomes_browsable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Show.Name.S01E02.mkv"), b"hello").unwrap();
        let (pipeline, vfs) = test_pipeline(dir.path()).await;

        pipeline.handle_add(PathBuf::from("Show.Name.S01E02.mkv")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(vfs.readdir("TV Shows/Show Name/S01").is_some());
    }

    #[tokio::test]
    async fn repeat_add_hits_the_hash_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Show.Name.S01E02.mkv"), b"hello").unwrap();
        let (pipeline, _vfs) = test_pipeline(dir.path()).await;

        pipeline.handle_add(PathBuf::from("Show.Name.S01E02.mkv")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        pipeline.handle_add(PathBuf::from("Show.Name.S01E02.mkv")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = pipeline.stats().metrics.hash_cache;
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.hits, 1);
    }

    #[tokio::test]
    async fn non_matching_extension_is_still_classified_as_other() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"hi").unwrap();
        assert_eq!(classify(Path::new("readme.txt")), Some(FileKind::Other));
        let _ = dir;
    }

    #[tokio::test]
    async fn hidden_file_is_rejected_at_validate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden.mkv"), b"hi").unwrap();
        let (pipeline, _vfs) = test_pipeline(dir.path()).await;

        pipeline.handle_add(PathBuf::from(".hidden.mkv")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = pipeline.stats();
        assert!(stats.state.discovered.is_empty());
        assert!(stats.state.done.is_empty());
    }

    #[tokio::test]
    async fn pause_blocks_progress_until_resumed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.mkv"), b"hi").unwrap();
        let (pipeline, _vfs) = test_pipeline(dir.path()).await;
        pipeline.pause();
        pipeline.handle_add(PathBuf::from("x.mkv")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pipeline.stats().state.done.len(), 0);
        pipeline.resume();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pipeline.stats().state.done.len(), 1);
    }
}
