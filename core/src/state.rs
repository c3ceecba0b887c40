//! C4 — StateTracker: the four-state (discovered/light/background/done)
//! per-path state machine with bounded retry and a capped recent-history
//! ring for `done`.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::digest::Digest;

/// Snapshot/ring cap (§4.4: "capped at ~100 items per state").
const SAMPLE_CAP: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct FileState {
    pub file_path: PathBuf,
    pub hash: Option<Digest>,
    pub virtual_path: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub discovered_at: Option<DateTime<Utc>>,
    pub light_start: Option<DateTime<Utc>>,
    pub light_end: Option<DateTime<Utc>>,
    pub bg_start: Option<DateTime<Utc>>,
    pub bg_end: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub light_duration_ms: Option<i64>,
    pub bg_duration_ms: Option<i64>,
    pub total_duration_ms: Option<i64>,
}

impl FileState {
    fn new(path: PathBuf) -> Self {
        Self { file_path: path, ..Default::default() }
    }
}

#[derive(Default)]
struct Inner {
    discovered: HashMap<PathBuf, FileState>,
    light: HashMap<PathBuf, FileState>,
    background: HashMap<PathBuf, FileState>,
    done: VecDeque<FileState>,
    total_done: u64,
}

/// All mutations serialize through a single lock (§5: "StateTracker
/// mutations are serialized similarly" to the VFS).
pub struct StateTracker {
    inner: RwLock<Inner>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::default()) }
    }

    /// Insert into `discovered`. A no-op if the path is tracked anywhere
    /// else already (§4.4).
    pub fn add_discovered(&self, path: PathBuf) {
        let mut inner = self.inner.write().unwrap();
        if inner.light.contains_key(&path) || inner.background.contains_key(&path) {
            return;
        }
        inner.discovered.entry(path.clone()).or_insert_with(|| {
            let mut s = FileState::new(path);
            s.discovered_at = Some(Utc::now());
            s
        });
    }

    /// Erase from all in-flight containers and the `done` ring.
    pub fn remove(&self, path: &std::path::Path) {
        let mut inner = self.inner.write().unwrap();
        inner.discovered.remove(path);
        inner.light.remove(path);
        inner.background.remove(path);
        inner.done.retain(|s| s.file_path != path);
    }

    pub fn start_light(&self, path: &std::path::Path) -> Option<FileState> {
        let mut inner = self.inner.write().unwrap();
        let mut state = inner.discovered.remove(path)?;
        state.light_start = Some(Utc::now());
        inner.light.insert(path.to_path_buf(), state.clone());
        Some(state)
    }

    /// On error, short-circuits straight to `complete_background` so a
    /// stage-2 failure still lands in `done` with accounting, per §4.4.
    pub fn complete_light(
        &self,
        path: &std::path::Path,
        hash: Option<Digest>,
        virtual_path: Option<String>,
        error: Option<String>,
    ) {
        if error.is_some() {
            self.complete_background(path, hash, virtual_path, error);
            return;
        }

        let mut inner = self.inner.write().unwrap();
        let Some(mut state) = inner.light.remove(path) else { return };
        state.light_end = Some(Utc::now());
        state.light_duration_ms = duration_ms(state.light_start, state.light_end);
        state.hash = hash;
        state.virtual_path = virtual_path;
        inner.background.insert(path.to_path_buf(), state);
    }

    pub fn start_background(&self, path: &std::path::Path) {
        let mut inner = self.inner.write().unwrap();
        if let Some(state) = inner.background.get_mut(path) {
            state.bg_start = Some(Utc::now());
        }
    }

    pub fn complete_background(
        &self,
        path: &std::path::Path,
        hash: Option<Digest>,
        virtual_path: Option<String>,
        error: Option<String>,
    ) {
        let mut inner = self.inner.write().unwrap();
        // The short-circuit from `complete_light` may hand us a state that
        // was never in `background` (stage-2 failed before insertion).
        let mut state = inner
            .background
            .remove(path)
            .or_else(|| inner.light.remove(path))
            .unwrap_or_else(|| FileState::new(path.to_path_buf()));

        state.bg_end = Some(Utc::now());
        state.bg_duration_ms = duration_ms(state.bg_start, state.bg_end);
        state.total_duration_ms = duration_ms(state.discovered_at, state.bg_end);
        if hash.is_some() {
            state.hash = hash;
        }
        if virtual_path.is_some() {
            state.virtual_path = virtual_path;
        }
        state.error = error;

        inner.done.push_front(state);
        inner.total_done += 1;
        while inner.done.len() > SAMPLE_CAP {
            inner.done.pop_back();
        }
    }

    /// If present in `light` or `background`, move back to `discovered`
    /// with `retry_count + 1`. Returns whether the retry applied.
    pub fn retry(&self, path: &std::path::Path) -> bool {
        let mut inner = self.inner.write().unwrap();
        let existing = inner.light.remove(path).or_else(|| inner.background.remove(path));
        let Some(mut state) = existing else { return false };
        state.retry_count += 1;
        state.last_retry_at = Some(Utc::now());
        state.light_start = None;
        state.bg_start = None;
        inner.discovered.insert(path.to_path_buf(), state);
        true
    }

    pub fn total_done(&self) -> u64 {
        self.inner.read().unwrap().total_done
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().unwrap();
        StateSnapshot {
            discovered: sample(inner.discovered.values()),
            light: sample(inner.light.values()),
            background: sample(inner.background.values()),
            done: inner.done.iter().take(SAMPLE_CAP).cloned().collect(),
            total_done: inner.total_done,
        }
    }
}

fn sample<'a>(iter: impl Iterator<Item = &'a FileState>) -> Vec<FileState> {
    iter.take(SAMPLE_CAP).cloned().collect()
}

fn duration_ms(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<i64> {
    match (start, end) {
        (Some(s), Some(e)) => Some((e - s).num_milliseconds()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct StateSnapshot {
    pub discovered: Vec<FileState>,
    pub light: Vec<FileState>,
    pub background: Vec<FileState>,
    pub done: Vec<FileState>,
    pub total_done: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_through_every_stage() {
        let t = StateTracker::new();
        let p = PathBuf::from("/a.mkv");
        t.add_discovered(p.clone());
        assert!(t.start_light(&p).is_some());
        t.complete_light(&p, Some(Digest::new(crate::digest::Algorithm::Midhash256, vec![1; 32])), Some("vp".into()), None);
        t.start_background(&p);
        t.complete_background(&p, None, None, None);

        let snap = t.snapshot();
        assert!(snap.discovered.is_empty());
        assert!(snap.light.is_empty());
        assert!(snap.background.is_empty());
        assert_eq!(snap.done.len(), 1);
        assert_eq!(snap.total_done, 1);
    }

    #[test]
    fn error_in_light_short_circuits_to_done() {
        let t = StateTracker::new();
        let p = PathBuf::from("/a.mkv");
        t.add_discovered(p.clone());
        t.start_light(&p);
        t.complete_light(&p, None, None, Some("boom".into()));

        let snap = t.snapshot();
        assert_eq!(snap.done.len(), 1);
        assert_eq!(snap.done[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn disjointness_across_stages() {
        let t = StateTracker::new();
        let p = PathBuf::from("/a.mkv");
        t.add_discovered(p.clone());
        t.add_discovered(p.clone()); // no-op, already in discovered
        t.start_light(&p);
        // Re-discovering while in light is a no-op per §4.4.
        t.add_discovered(p.clone());
        let snap = t.snapshot();
        assert!(snap.discovered.is_empty());
        assert_eq!(snap.light.len(), 1);
    }

    #[test]
    fn retry_moves_back_to_discovered_with_incremented_count() {
        let t = StateTracker::new();
        let p = PathBuf::from("/a.mkv");
        t.add_discovered(p.clone());
        t.start_light(&p);
        assert!(t.retry(&p));
        let snap = t.snapshot();
        assert_eq!(snap.discovered.len(), 1);
        assert_eq!(snap.discovered[0].retry_count, 1);
    }

    #[test]
    fn retry_is_false_when_not_in_flight() {
        let t = StateTracker::new();
        let p = PathBuf::from("/a.mkv");
        t.add_discovered(p.clone());
        assert!(!t.retry(&p));
    }

    #[test]
    fn done_ring_is_capped() {
        let t = StateTracker::new();
        for i in 0..(SAMPLE_CAP + 10) {
            let p = PathBuf::from(format!("/f{i}.mkv"));
            t.add_discovered(p.clone());
            t.start_light(&p);
            t.complete_light(&p, None, None, None);
            t.complete_background(&p, None, None, None);
        }
        let snap = t.snapshot();
        assert_eq!(snap.done.len(), SAMPLE_CAP);
        assert_eq!(snap.total_done, (SAMPLE_CAP + 10) as u64);
    }
}
