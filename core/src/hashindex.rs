//! C2 — HashIndex: a per-algorithm CSV cache mapping `(path, size, mtime)`
//! to a previously-computed digest, so unchanged files skip re-hashing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::digest::{Algorithm, Digest};
use crate::error::{CatalogError, Result};

/// Every index file shares these first three columns; the fourth column's
/// header name is the algorithm name itself and its values are hex digests.
const FIXED_HEADER: [&str; 3] = ["path", "size", "mtime"];

/// Minimum interval between flushes; doubles (capped at ten minutes) when a
/// flush finds nothing dirty, so a quiet index stops polling its own disk.
const FLUSH_FLOOR: Duration = Duration::from_secs(1);
const FLUSH_CEILING: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    path: PathBuf,
    size: u64,
    mtime_millis: i64,
}

struct Entry {
    algo: Algorithm,
    digest: Digest,
}

struct Inner {
    entries: HashMap<Key, Entry>,
    dirty: bool,
}

/// One CSV file per algorithm under `dir`, named `<algo>.csv`.
pub struct HashIndex {
    dir: PathBuf,
    inner: RwLock<Inner>,
    next_flush_interval: RwLock<Duration>,
}

impl HashIndex {
    /// Load every `<algo>.csv` file found under `dir` that matches a known
    /// algorithm name; missing files are treated as an empty cache.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CatalogError::InvalidIndex {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

        let mut entries = HashMap::new();
        for algo in [
            Algorithm::Sha1,
            Algorithm::Sha256,
            Algorithm::Sha3_256,
            Algorithm::Sha3_384,
            Algorithm::Md5,
            Algorithm::Crc32,
            Algorithm::Midhash256,
            Algorithm::Btihv2,
        ] {
            let path = csv_path(&dir, algo);
            if !path.exists() {
                continue;
            }
            load_csv(&path, algo, &mut entries)?;
        }

        Ok(Self {
            dir,
            inner: RwLock::new(Inner { entries, dirty: false }),
            next_flush_interval: RwLock::new(FLUSH_FLOOR),
        })
    }

    /// Look up a cached digest for `path` at algorithm `algo`, valid only if
    /// the recorded size and mtime still match.
    pub fn lookup(&self, path: &Path, size: u64, mtime: DateTime<Utc>, algo: Algorithm) -> Option<Digest> {
        let key = Key { path: path.to_path_buf(), size, mtime_millis: mtime.timestamp_millis() };
        let inner = self.inner.read().unwrap();
        inner.entries.get(&key).filter(|e| e.algo == algo).map(|e| e.digest.clone())
    }

    pub fn insert(&self, path: &Path, size: u64, mtime: DateTime<Utc>, digest: Digest) {
        let key = Key { path: path.to_path_buf(), size, mtime_millis: mtime.timestamp_millis() };
        let mut inner = self.inner.write().unwrap();
        inner.entries.insert(key, Entry { algo: digest.algo, digest });
        inner.dirty = true;
    }

    /// Write every algorithm's table back to disk. Returns the interval to
    /// wait before calling again — doubled on a quiet flush, reset to the
    /// floor the moment something is dirty again.
    pub fn flush(&self) -> Result<Duration> {
        let mut inner = self.inner.write().unwrap();
        if !inner.dirty {
            let mut next = self.next_flush_interval.write().unwrap();
            *next = (*next * 2).min(FLUSH_CEILING);
            return Ok(*next);
        }

        let mut by_algo: HashMap<Algorithm, Vec<(&Key, &Entry)>> = HashMap::new();
        for (key, entry) in inner.entries.iter() {
            by_algo.entry(entry.algo).or_default().push((key, entry));
        }

        for (algo, mut rows) in by_algo {
            rows.sort_by(|a, b| a.0.path.cmp(&b.0.path));
            write_csv(&csv_path(&self.dir, algo), algo, &rows)?;
        }

        inner.dirty = false;
        *self.next_flush_interval.write().unwrap() = FLUSH_FLOOR;
        Ok(FLUSH_FLOOR)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn csv_path(dir: &Path, algo: Algorithm) -> PathBuf {
    dir.join(format!("{}.csv", algo.name()))
}

fn load_csv(path: &Path, algo: Algorithm, out: &mut HashMap<Key, Entry>) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path).map_err(|e| {
        CatalogError::InvalidIndex { path: path.to_path_buf(), reason: e.to_string() }
    })?;

    {
        let headers = reader.headers().map_err(|e| CatalogError::InvalidIndex {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let expected: [&str; 4] = [FIXED_HEADER[0], FIXED_HEADER[1], FIXED_HEADER[2], algo.name()];
        if headers.iter().collect::<Vec<_>>() != expected.to_vec() {
            return Err(CatalogError::InvalidIndex {
                path: path.to_path_buf(),
                reason: format!("unexpected header {headers:?}, expected {expected:?}"),
            });
        }
    }

    for record in reader.records() {
        let record = record.map_err(|e| CatalogError::InvalidIndex {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if record.len() != 4 {
            return Err(CatalogError::InvalidIndex {
                path: path.to_path_buf(),
                reason: format!("row with {} fields, expected 4", record.len()),
            });
        }
        let row_path = PathBuf::from(&record[0]);
        let size: u64 = record[1].parse().map_err(|_| CatalogError::InvalidIndex {
            path: path.to_path_buf(),
            reason: format!("non-numeric size '{}'", &record[1]),
        })?;
        let mtime_millis: i64 = record[2].parse().map_err(|_| CatalogError::InvalidIndex {
            path: path.to_path_buf(),
            reason: format!("non-numeric mtime '{}'", &record[2]),
        })?;
        let digest = Digest::parse(algo, &record[3])?;

        out.insert(Key { path: row_path, size, mtime_millis }, Entry { algo, digest });
    }
    Ok(())
}

fn write_csv(path: &Path, algo: Algorithm, rows: &[(&Key, &Entry)]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path).map_err(|e| {
        CatalogError::InvalidIndex { path: path.to_path_buf(), reason: e.to_string() }
    })?;

    writer
        .write_record([FIXED_HEADER[0], FIXED_HEADER[1], FIXED_HEADER[2], algo.name()])
        .map_err(io_err(path))?;
    for (key, entry) in rows {
        writer
            .write_record([
                key.path.to_string_lossy().to_string(),
                key.size.to_string(),
                key.mtime_millis.to_string(),
                entry.digest.to_hex(),
            ])
            .map_err(io_err(path))?;
    }
    writer.flush().map_err(|e| CatalogError::TransientIo(e.to_string()))?;
    Ok(())
}

fn io_err(path: &Path) -> impl Fn(csv::Error) -> CatalogError + '_ {
    move |e| CatalogError::InvalidIndex { path: path.to_path_buf(), reason: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let idx = HashIndex::open(dir.path()).unwrap();
        let digest = Digest::new(Algorithm::Sha256, vec![1, 2, 3]);
        idx.insert(Path::new("/a.mkv"), 100, now(), digest.clone());
        let found = idx.lookup(Path::new("/a.mkv"), 100, now(), Algorithm::Sha256).unwrap();
        assert_eq!(found, digest);
    }

    #[test]
    fn lookup_misses_on_size_or_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let idx = HashIndex::open(dir.path()).unwrap();
        idx.insert(Path::new("/a.mkv"), 100, now(), Digest::new(Algorithm::Sha256, vec![1]));
        assert!(idx.lookup(Path::new("/a.mkv"), 101, now(), Algorithm::Sha256).is_none());
    }

    #[test]
    fn flush_then_reopen_persists_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let idx = HashIndex::open(dir.path()).unwrap();
            idx.insert(Path::new("/a.mkv"), 100, now(), Digest::new(Algorithm::Sha256, vec![9, 9]));
            idx.flush().unwrap();
        }
        let reopened = HashIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let found = reopened.lookup(Path::new("/a.mkv"), 100, now(), Algorithm::Sha256).unwrap();
        assert_eq!(found.bytes, vec![9, 9]);
    }

    #[test]
    fn flush_interval_doubles_while_quiet_and_resets_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let idx = HashIndex::open(dir.path()).unwrap();
        let first = idx.flush().unwrap();
        let second = idx.flush().unwrap();
        assert!(second > first);
        idx.insert(Path::new("/a.mkv"), 1, now(), Digest::new(Algorithm::Sha256, vec![1]));
        let after_write = idx.flush().unwrap();
        assert_eq!(after_write, FLUSH_FLOOR);
    }

    #[test]
    fn header_mismatch_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sha256.csv"), "bogus,header\n1,2\n").unwrap();
        assert!(matches!(HashIndex::open(dir.path()), Err(CatalogError::InvalidIndex { .. })));
    }
}
