//! A minimal component-scoped counter set backing `Pipeline::stats()`. §1
//! excludes a metrics *endpoint* (no Prometheus exposition), but the
//! pipeline still needs in-process counters to answer `/status` (§6).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct StageCounters {
    pub accepted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
}

impl StageCounters {
    pub fn accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn complete(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StageSnapshot {
    pub accepted: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

/// §4.8 stage-2: "look up digest cache by (basename, size, mtime) … in
/// both cases record a cache hit/miss metric."
#[derive(Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed) }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
pub struct PipelineMetrics {
    pub validate: StageCounters,
    pub light: StageCounters,
    pub background: StageCounters,
    pub hash_cache: CacheCounters,
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct PipelineMetricsSnapshot {
    pub validate: StageSnapshot,
    pub light: StageSnapshot,
    pub background: StageSnapshot,
    pub hash_cache: CacheSnapshot,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            validate: self.validate.snapshot(),
            light: self.light.snapshot(),
            background: self.background.snapshot(),
            hash_cache: self.hash_cache.snapshot(),
        }
    }
}
