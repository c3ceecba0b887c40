//! §3 `MetaRecord` — the per-file metadata object, plus the monotone merge
//! rule newcomers are folded into it with.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::digest::{Algorithm, Digest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Video,
    Subtitle,
    Torrent,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

/// A dynamic `any`-typed value for the free-attribute bag (§9 design note:
/// "model as a typed sum").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    String(String),
    Bool(bool),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Monotone merge: lists and maps union recursively; everything else
    /// keeps the existing value and warns on conflict (§3).
    fn merge(self, other: AttrValue, key: &str) -> AttrValue {
        match (self, other) {
            (AttrValue::Map(mut a), AttrValue::Map(b)) => {
                for (k, v) in b {
                    match a.remove(&k) {
                        Some(existing) => {
                            a.insert(k.clone(), existing.merge(v, &format!("{key}.{k}")));
                        }
                        None => {
                            a.insert(k, v);
                        }
                    }
                }
                AttrValue::Map(a)
            }
            (AttrValue::List(mut a), AttrValue::List(b)) => {
                for item in b {
                    if !a.contains(&item) {
                        a.push(item);
                    }
                }
                AttrValue::List(a)
            }
            (existing, incoming) => {
                if existing != incoming {
                    warn!(attribute = key, "keeping existing value on merge conflict");
                }
                existing
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaRecord {
    pub source_path: PathBuf,
    pub title: Option<String>,
    pub original_title: Option<String>,
    /// ISO-639 language code, for subtitle suffixing.
    pub language: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u32>,
    pub kind: FileKind,
    pub size_byte: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub digests: BTreeMap<Algorithm, Digest>,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
    pub status: ProcessingStatus,
    pub virtual_path: Option<String>,
    /// §9 open question: preserved for on-disk compatibility even though
    /// only `status`/pipeline state is read by the pipeline itself.
    pub processing_status: Option<String>,
    /// Extra/hidden flag set by title-duplicate versioning (§4.6).
    #[serde(default)]
    pub extra: bool,
    /// Version suffix ("V2", "V3", …) set by title-duplicate versioning.
    pub version: Option<String>,
}

impl MetaRecord {
    pub fn new(source_path: PathBuf, kind: FileKind) -> Self {
        Self {
            source_path,
            title: None,
            original_title: None,
            language: None,
            season: None,
            episode: None,
            year: None,
            kind,
            size_byte: None,
            mtime: None,
            digests: BTreeMap::new(),
            attrs: BTreeMap::new(),
            status: ProcessingStatus::Pending,
            virtual_path: None,
            processing_status: Some("pending".to_string()),
            extra: false,
            version: None,
        }
    }

    /// §3 monotone merge: an absent field may be filled by `other`; a
    /// present primitive field is kept on conflict (with a warning); nested
    /// mappings/sets merge recursively, sets by union.
    pub fn merge(&mut self, other: MetaRecord) {
        macro_rules! fill_or_warn {
            ($field:ident) => {
                match (&self.$field, other.$field) {
                    (None, Some(v)) => self.$field = Some(v),
                    (Some(existing), Some(v)) if existing != &v => {
                        warn!(
                            field = stringify!($field),
                            path = %self.source_path.display(),
                            "keeping existing value on merge conflict"
                        );
                    }
                    _ => {}
                }
            };
        }

        fill_or_warn!(title);
        fill_or_warn!(original_title);
        fill_or_warn!(language);
        fill_or_warn!(season);
        fill_or_warn!(episode);
        fill_or_warn!(year);
        fill_or_warn!(size_byte);
        fill_or_warn!(mtime);
        fill_or_warn!(virtual_path);
        fill_or_warn!(version);

        for (algo, digest) in other.digests {
            self.digests.entry(algo).or_insert(digest);
        }

        for (key, value) in other.attrs {
            match self.attrs.remove(&key) {
                Some(existing) => {
                    self.attrs.insert(key.clone(), existing.merge(value, &key));
                }
                None => {
                    self.attrs.insert(key, value);
                }
            }
        }

        // extra/status/kind/processing_status are driven by pipeline stage
        // transitions, not by merge — left untouched here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(kind: FileKind) -> MetaRecord {
        MetaRecord::new(PathBuf::from("/x"), kind)
    }

    #[test]
    fn fills_absent_fields() {
        let mut a = rec(FileKind::Video);
        let mut b = rec(FileKind::Video);
        b.title = Some("Show".into());
        a.merge(b);
        assert_eq!(a.title.as_deref(), Some("Show"));
    }

    #[test]
    fn keeps_existing_on_conflict() {
        let mut a = rec(FileKind::Video);
        a.title = Some("A".into());
        let mut b = rec(FileKind::Video);
        b.title = Some("B".into());
        a.merge(b);
        assert_eq!(a.title.as_deref(), Some("A"));
    }

    #[test]
    fn unions_list_attrs() {
        let mut a = rec(FileKind::Video);
        a.attrs.insert("genres".into(), AttrValue::List(vec![AttrValue::String("Drama".into())]));
        let mut b = rec(FileKind::Video);
        b.attrs.insert(
            "genres".into(),
            AttrValue::List(vec![AttrValue::String("Drama".into()), AttrValue::String("Crime".into())]),
        );
        a.merge(b);
        match &a.attrs["genres"] {
            AttrValue::List(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected list"),
        }
    }
}
