//! C3 — VFS: the virtual filesystem tree the catalog is browsed through.
//! §9 design note: nodes live in a single flat map keyed by normalized path
//! string rather than cross-referencing each other by pointer, so there's no
//! ownership cycle between parent and child. Aggregate stats are maintained
//! incrementally on every mutation, not recomputed by traversal, except in
//! `rebuild_from`.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::meta::MetaRecord;
use crate::sidecar::SidecarFormat;

#[derive(Clone, Debug)]
pub struct DirNode {
    pub name: String,
    pub parent: Option<String>,
    pub children: HashSet<String>,
}

#[derive(Clone, Debug)]
pub struct FileNode {
    pub name: String,
    pub parent: Option<String>,
    /// `None` for a synthetic sidecar body generated on read, `Some` for a
    /// file backed by a real path in the source tree.
    pub source_path: Option<std::path::PathBuf>,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub meta: Option<MetaRecord>,
    pub sidecar_format: Option<SidecarFormat>,
}

#[derive(Clone, Debug)]
pub enum VfsNode {
    Directory(DirNode),
    File(FileNode),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VfsStats {
    pub file_count: u64,
    pub directory_count: u64,
    pub total_bytes: u64,
    pub sidecar_count: u64,
}

#[derive(Clone, Debug)]
pub enum VfsEvent {
    FileAdded(String),
    FileUpdated(String),
    FileRemoved(String),
    DirectoryAdded(String),
}

pub type Listener = Box<dyn Fn(&VfsEvent) + Send + Sync>;

/// POSIX type bits `getattr` OR's its permission bits onto (§4.3).
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
/// Configured permission bits: directories get `rwxr-xr-x`, files `rw-r--r--`.
const DIR_PERM_BITS: u32 = 0o755;
const FILE_PERM_BITS: u32 = 0o644;
/// Configured ownership. The catalog has no notion of a filesystem user, so
/// every node reports root-owned attrs, matching the "config-default values"
/// fallback (§4.3).
const DEFAULT_UID: u32 = 0;
const DEFAULT_GID: u32 = 0;

#[derive(Clone, Debug)]
pub struct Attrs {
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

pub enum ReadResult {
    /// Real file: read from this path on the source filesystem.
    Source(std::path::PathBuf),
    /// Synthetic sidecar: its bytes, generated on demand from the embedded
    /// record.
    Bytes(Vec<u8>),
}

struct Tree {
    nodes: std::collections::HashMap<String, VfsNode>,
    stats: VfsStats,
}

/// Root normalizes to `""`. All other keys are `/`-joined, no leading or
/// trailing slash.
const ROOT: &str = "";

pub struct Vfs {
    tree: RwLock<Tree>,
    listeners: RwLock<Vec<Listener>>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    pub fn new() -> Self {
        let mut nodes = std::collections::HashMap::new();
        nodes.insert(
            ROOT.to_string(),
            VfsNode::Directory(DirNode { name: String::new(), parent: None, children: HashSet::new() }),
        );
        Self {
            tree: RwLock::new(Tree { nodes, stats: VfsStats::default() }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn on_event(&self, listener: Listener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Callbacks run synchronously after the tree lock is released, per §9:
    /// "consumers must not re-enter the emitter."
    fn emit(&self, event: VfsEvent) {
        for listener in self.listeners.read().unwrap().iter() {
            listener(&event);
        }
    }

    pub fn stats(&self) -> VfsStats {
        self.tree.read().unwrap().stats.clone()
    }

    /// Insert (or overwrite) a real file at `virtual_path`, creating any
    /// missing ancestor directories, plus its active sidecar projections.
    pub fn insert_file(
        &self,
        virtual_path: &str,
        source_path: std::path::PathBuf,
        meta: Option<MetaRecord>,
    ) {
        let key = normalize(virtual_path);
        let now = Utc::now();
        let (size, mtime) = size_and_mtime(&meta, &source_path, now);

        let is_new;
        let mut events = Vec::new();
        {
            let mut tree = self.tree.write().unwrap();
            ensure_ancestors(&mut tree, &key, &mut events);

            is_new = !matches!(tree.nodes.get(&key), Some(VfsNode::File(_)));
            let name = key.rsplit('/').next().unwrap_or(&key).to_string();
            let parent = parent_key(&key);

            if let Some(VfsNode::File(existing)) = tree.nodes.get(&key) {
                tree.stats.total_bytes = tree.stats.total_bytes.saturating_sub(existing.size);
            } else if is_new {
                tree.stats.file_count += 1;
                link_child(&mut tree, &parent, &name);
            }
            tree.stats.total_bytes += size;

            tree.nodes.insert(
                key.clone(),
                VfsNode::File(FileNode {
                    name,
                    parent: Some(parent),
                    source_path: Some(source_path),
                    size,
                    mtime,
                    ctime: now,
                    meta: meta.clone(),
                    sidecar_format: None,
                }),
            );

            project_sidecars(&mut tree, &key, meta.as_ref(), &mut events);
            events.push(if is_new { VfsEvent::FileAdded(key.clone()) } else { VfsEvent::FileUpdated(key.clone()) });
        }
        for e in events {
            self.emit(e);
        }
    }

    /// Replace the embedded record on an existing file and regenerate its
    /// sidecars. A no-op (no event) if the path isn't a file.
    pub fn update_metadata(&self, virtual_path: &str, meta: MetaRecord) {
        let key = normalize(virtual_path);
        let mut events = Vec::new();
        {
            let mut tree = self.tree.write().unwrap();
            let Some(VfsNode::File(file)) = tree.nodes.get_mut(&key) else { return };
            file.meta = Some(meta.clone());
            project_sidecars(&mut tree, &key, Some(&meta), &mut events);
            events.push(VfsEvent::FileUpdated(key.clone()));
        }
        for e in events {
            self.emit(e);
        }
    }

    /// Remove a file and its sidecars, unlinking it from its parent
    /// directory. Removing a directory recursively removes its subtree.
    pub fn remove_file(&self, virtual_path: &str) {
        let key = normalize(virtual_path);
        let mut events = Vec::new();
        {
            let mut tree = self.tree.write().unwrap();
            remove_subtree(&mut tree, &key, &mut events);
        }
        for e in events {
            self.emit(e);
        }
    }

    pub fn readdir(&self, virtual_path: &str) -> Option<Vec<String>> {
        let key = normalize(virtual_path);
        let tree = self.tree.read().unwrap();
        match tree.nodes.get(&key)? {
            VfsNode::Directory(dir) => {
                let mut names: Vec<String> = dir.children.iter().cloned().collect();
                names.sort();
                Some(names)
            }
            VfsNode::File(_) => None,
        }
    }

    pub fn getattr(&self, virtual_path: &str) -> Option<Attrs> {
        let key = normalize(virtual_path);
        let tree = self.tree.read().unwrap();
        match tree.nodes.get(&key)? {
            VfsNode::Directory(_) => {
                let now = Utc::now();
                Some(Attrs {
                    is_dir: true,
                    size: 0,
                    mode: S_IFDIR | DIR_PERM_BITS,
                    nlink: 2,
                    uid: DEFAULT_UID,
                    gid: DEFAULT_GID,
                    atime: now,
                    mtime: now,
                    ctime: now,
                })
            }
            VfsNode::File(f) => Some(Attrs {
                is_dir: false,
                size: f.size,
                mode: S_IFREG | FILE_PERM_BITS,
                nlink: 1,
                uid: DEFAULT_UID,
                gid: DEFAULT_GID,
                atime: f.mtime,
                mtime: f.mtime,
                ctime: f.ctime,
            }),
        }
    }

    pub fn read(&self, virtual_path: &str) -> Option<ReadResult> {
        let key = normalize(virtual_path);
        let tree = self.tree.read().unwrap();
        match tree.nodes.get(&key)? {
            VfsNode::File(f) => match f.sidecar_format {
                Some(format) => {
                    let meta = f.meta.as_ref()?;
                    Some(ReadResult::Bytes(format.generate(meta)))
                }
                None => f.source_path.clone().map(ReadResult::Source),
            },
            VfsNode::Directory(_) => None,
        }
    }

    /// The embedded record for a file, if any. `None` for directories and
    /// for files with no metadata yet (still in the light stage).
    pub fn metadata(&self, virtual_path: &str) -> Option<MetaRecord> {
        let key = normalize(virtual_path);
        let tree = self.tree.read().unwrap();
        match tree.nodes.get(&key)? {
            VfsNode::File(f) => f.meta.clone(),
            VfsNode::Directory(_) => None,
        }
    }

    pub fn exists(&self, virtual_path: &str) -> bool {
        let key = normalize(virtual_path);
        self.tree.read().unwrap().nodes.contains_key(&key)
    }

    /// Every file path in the tree, unordered.
    pub fn all_files(&self) -> Vec<String> {
        self.tree
            .read()
            .unwrap()
            .nodes
            .iter()
            .filter_map(|(k, n)| matches!(n, VfsNode::File(_)).then(|| k.clone()))
            .collect()
    }

    /// Every directory path in the tree, including the root (`""`).
    pub fn all_directories(&self) -> Vec<String> {
        self.tree
            .read()
            .unwrap()
            .nodes
            .iter()
            .filter_map(|(k, n)| matches!(n, VfsNode::Directory(_)).then(|| k.clone()))
            .collect()
    }

    /// Tear down everything below the root and reinsert fresh nodes from an
    /// iterator of `(virtual_path, source_path, meta)`. Used at boot when
    /// the orchestrator rebuilds the tree from the persisted KV store (§5).
    pub fn rebuild_from<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, std::path::PathBuf, Option<MetaRecord>)>,
    {
        {
            let mut tree = self.tree.write().unwrap();
            tree.nodes.clear();
            tree.nodes.insert(
                ROOT.to_string(),
                VfsNode::Directory(DirNode { name: String::new(), parent: None, children: HashSet::new() }),
            );
            tree.stats = VfsStats::default();
        }
        for (virtual_path, source_path, meta) in entries {
            self.insert_file(&virtual_path, source_path, meta);
        }
    }
}

fn size_and_mtime(
    meta: &Option<MetaRecord>,
    source_path: &std::path::Path,
    now: DateTime<Utc>,
) -> (u64, DateTime<Utc>) {
    if let Some(m) = meta {
        if let Some(size) = m.size_byte {
            return (size, m.mtime.unwrap_or(now));
        }
    }
    match std::fs::metadata(source_path) {
        Ok(md) => {
            let mtime = md.modified().ok().and_then(system_time_to_utc).unwrap_or(now);
            (md.len(), mtime)
        }
        Err(_) => (0, now),
    }
}

fn system_time_to_utc(t: SystemTime) -> Option<DateTime<Utc>> {
    Some(DateTime::<Utc>::from(t))
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent_key(key: &str) -> String {
    match key.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => ROOT.to_string(),
    }
}

fn link_child(tree: &mut Tree, parent_key: &str, name: &str) {
    if let Some(VfsNode::Directory(dir)) = tree.nodes.get_mut(parent_key) {
        dir.children.insert(name.to_string());
    }
}

fn unlink_child(tree: &mut Tree, parent_key: &str, name: &str) {
    if let Some(VfsNode::Directory(dir)) = tree.nodes.get_mut(parent_key) {
        dir.children.remove(name);
    }
}

/// Create any missing directories along `key`'s ancestor chain.
fn ensure_ancestors(tree: &mut Tree, key: &str, events: &mut Vec<VfsEvent>) {
    let parent = parent_key(key);
    if parent == ROOT {
        return;
    }
    if tree.nodes.contains_key(&parent) {
        return;
    }
    ensure_ancestors(tree, &parent, events);

    let grandparent = parent_key(&parent);
    let name = parent.rsplit('/').next().unwrap_or(&parent).to_string();
    tree.nodes.insert(
        parent.clone(),
        VfsNode::Directory(DirNode { name, parent: Some(grandparent.clone()), children: HashSet::new() }),
    );
    link_child(tree, &grandparent, parent.rsplit('/').next().unwrap_or(&parent));
    tree.stats.directory_count += 1;
    events.push(VfsEvent::DirectoryAdded(parent));
}

/// Insert/replace/remove sidecar nodes for `key` so exactly the formats
/// with renderable content exist, accounting stats as they come and go.
fn project_sidecars(tree: &mut Tree, key: &str, meta: Option<&MetaRecord>, events: &mut Vec<VfsEvent>) {
    for format in SidecarFormat::all() {
        let sidecar_key = format!("{key}{}", format.extension());
        let name = sidecar_key.rsplit('/').next().unwrap_or(&sidecar_key).to_string();
        let parent = parent_key(key);

        match meta {
            Some(m) => {
                let already_present = tree.nodes.contains_key(&sidecar_key);
                tree.nodes.insert(
                    sidecar_key.clone(),
                    VfsNode::File(FileNode {
                        name: name.clone(),
                        parent: Some(parent.clone()),
                        source_path: None,
                        size: 0,
                        mtime: m.mtime.unwrap_or_else(Utc::now),
                        ctime: Utc::now(),
                        meta: Some(m.clone()),
                        sidecar_format: Some(*format),
                    }),
                );
                if !already_present {
                    link_child(tree, &parent, &name);
                    tree.stats.file_count += 1;
                    tree.stats.sidecar_count += 1;
                    events.push(VfsEvent::FileAdded(sidecar_key));
                } else {
                    events.push(VfsEvent::FileUpdated(sidecar_key));
                }
            }
            None => {
                if tree.nodes.remove(&sidecar_key).is_some() {
                    unlink_child(tree, &parent, &name);
                    tree.stats.file_count = tree.stats.file_count.saturating_sub(1);
                    tree.stats.sidecar_count = tree.stats.sidecar_count.saturating_sub(1);
                    events.push(VfsEvent::FileRemoved(sidecar_key));
                }
            }
        }
    }
}

fn remove_subtree(tree: &mut Tree, key: &str, events: &mut Vec<VfsEvent>) {
    let Some(node) = tree.nodes.remove(key) else { return };
    match node {
        VfsNode::File(f) => {
            tree.stats.file_count = tree.stats.file_count.saturating_sub(1);
            tree.stats.total_bytes = tree.stats.total_bytes.saturating_sub(f.size);
            if f.sidecar_format.is_some() {
                tree.stats.sidecar_count = tree.stats.sidecar_count.saturating_sub(1);
            }
            if let Some(parent) = &f.parent {
                let name = key.rsplit('/').next().unwrap_or(key).to_string();
                unlink_child(tree, parent, &name);
            }
            events.push(VfsEvent::FileRemoved(key.to_string()));

            if f.sidecar_format.is_none() {
                for format in SidecarFormat::all() {
                    let sidecar_key = format!("{key}{}", format.extension());
                    remove_subtree(tree, &sidecar_key, events);
                }
            }
        }
        VfsNode::Directory(dir) => {
            tree.stats.directory_count = tree.stats.directory_count.saturating_sub(1);
            let children: Vec<String> = dir.children.iter().map(|name| format!("{key}/{name}")).collect();
            for child in children {
                let child = child.trim_start_matches('/').to_string();
                remove_subtree(tree, &child, events);
            }
            if let Some(parent) = &dir.parent {
                let name = key.rsplit('/').next().unwrap_or(key).to_string();
                unlink_child(tree, parent, &name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::FileKind;
    use std::path::PathBuf;

    fn meta() -> MetaRecord {
        let mut m = MetaRecord::new(PathBuf::from("/in/a.mkv"), FileKind::Video);
        m.title = Some("A".into());
        m.size_byte = Some(100);
        m
    }

    #[test]
    fn insert_creates_ancestor_directories() {
        let vfs = Vfs::new();
        vfs.insert_file("Movies/A (2020)/A.mkv", PathBuf::from("/in/a.mkv"), Some(meta()));
        assert_eq!(vfs.readdir("").unwrap(), vec!["Movies".to_string()]);
        assert_eq!(vfs.readdir("Movies").unwrap(), vec!["A (2020)".to_string()]);
        let mut names = vfs.readdir("Movies/A (2020)").unwrap();
        names.sort();
        assert_eq!(names, vec!["A.mkv".to_string(), "A.mkv.meta".to_string(), "A.mkv.nfo".to_string()]);
    }

    #[test]
    fn stats_track_file_and_sidecar_counts() {
        let vfs = Vfs::new();
        vfs.insert_file("Movies/A/A.mkv", PathBuf::from("/in/a.mkv"), Some(meta()));
        let stats = vfs.stats();
        assert_eq!(stats.file_count, 3); // file + 2 sidecars
        assert_eq!(stats.sidecar_count, 2);
        assert_eq!(stats.total_bytes, 100);
        assert_eq!(stats.directory_count, 2); // Movies, Movies/A
    }

    #[test]
    fn insert_without_meta_has_no_sidecars() {
        let vfs = Vfs::new();
        vfs.insert_file("Movies/A/A.mkv", PathBuf::from("/in/a.mkv"), None);
        assert_eq!(vfs.stats().sidecar_count, 0);
        assert_eq!(vfs.readdir("Movies/A").unwrap(), vec!["A.mkv".to_string()]);
    }

    #[test]
    fn update_metadata_regenerates_sidecars_in_place() {
        let vfs = Vfs::new();
        vfs.insert_file("Movies/A/A.mkv", PathBuf::from("/in/a.mkv"), Some(meta()));
        let mut updated = meta();
        updated.title = Some("B".into());
        vfs.update_metadata("Movies/A/A.mkv", updated);
        match vfs.read("Movies/A/A.mkv.meta").unwrap() {
            ReadResult::Bytes(b) => assert!(String::from_utf8(b).unwrap().contains("B")),
            _ => panic!("expected synthetic sidecar bytes"),
        }
        assert_eq!(vfs.stats().sidecar_count, 2);
    }

    #[test]
    fn remove_file_clears_sidecars_and_parent_link() {
        let vfs = Vfs::new();
        vfs.insert_file("Movies/A/A.mkv", PathBuf::from("/in/a.mkv"), Some(meta()));
        vfs.remove_file("Movies/A/A.mkv");
        assert!(vfs.readdir("Movies/A").unwrap().is_empty());
        assert_eq!(vfs.stats().file_count, 0);
        assert_eq!(vfs.stats().sidecar_count, 0);
        assert_eq!(vfs.stats().total_bytes, 0);
    }

    #[test]
    fn rebuild_from_replaces_whole_tree() {
        let vfs = Vfs::new();
        vfs.insert_file("Movies/Old/Old.mkv", PathBuf::from("/in/old.mkv"), Some(meta()));
        vfs.rebuild_from(vec![("Movies/New/New.mkv".to_string(), PathBuf::from("/in/new.mkv"), Some(meta()))]);
        assert!(vfs.readdir("Movies/Old").is_none());
        assert_eq!(vfs.readdir("Movies").unwrap(), vec!["New".to_string()]);
    }

    #[test]
    fn events_fire_for_add_update_and_remove() {
        use std::sync::{Arc, Mutex};
        let vfs = Vfs::new();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        vfs.on_event(Box::new(move |e| {
            log2.lock().unwrap().push(format!("{e:?}"));
        }));
        vfs.insert_file("Movies/A/A.mkv", PathBuf::from("/in/a.mkv"), Some(meta()));
        vfs.remove_file("Movies/A/A.mkv");
        let log = log.lock().unwrap();
        assert!(log.iter().any(|e| e.contains("FileAdded")));
        assert!(log.iter().any(|e| e.contains("FileRemoved")));
    }
}
