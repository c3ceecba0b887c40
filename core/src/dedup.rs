//! C6 — DuplicateDetector: two passes over a batch of records. Hash
//! equivalence collapses byte-identical files down to one canonical copy;
//! title equivalence assigns version suffixes ("V2", "V3", …) to distinct
//! files that describe the same title/season/episode. Subtitles are exempt
//! from the hash pass and from being hidden via `extra`, but still get
//! grouped and versioned in the title pass.

use std::collections::HashMap;
use std::path::PathBuf;

use rayon::prelude::*;

use crate::digest::Algorithm;
use crate::meta::{FileKind, MetaRecord};
use crate::rename;

/// The digest algorithm hash-equivalence groups on (§4.6: "key = canonical
/// SHA-256 digest"). SHA-256 is one of the background-stage algorithms, so
/// it's available by the time this runs (§4.8 stage 3 runs the detector
/// after computing it).
const EQUIVALENCE_ALGO: Algorithm = Algorithm::Sha256;

/// §3 `DuplicateGroup`: a key (hash value or normalized virtual path), the
/// member source paths in path order, and the group's canonical virtual
/// path (if one could be derived).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: String,
    pub members: Vec<PathBuf>,
    pub canonical_virtual_path: Option<String>,
}

pub struct DuplicateDetector;

impl DuplicateDetector {
    /// Runs both passes in place and returns the group reports (§4.6:
    /// "returns both group lists"). Order matters: hash duplicates are
    /// culled first so the title pass only versions records that are
    /// genuinely distinct on disk. Inputs without a derivable key are
    /// silently skipped, per §4.6.
    pub fn detect(records: &mut [MetaRecord]) -> (Vec<DuplicateGroup>, Vec<DuplicateGroup>) {
        let hash_groups = Self::hash_pass(records);
        let title_groups = Self::title_pass(records);
        (hash_groups, title_groups)
    }

    /// Groups records sharing a SHA-256 digest. Within a group, the
    /// record with the alphabetically-earliest source path is canonical
    /// (the group's key is its `renameRule` output per §4.6); the rest are
    /// marked `extra` and removed from the working map by the caller.
    fn hash_pass(records: &mut [MetaRecord]) -> Vec<DuplicateGroup> {
        let keys: Vec<Option<Vec<u8>>> = records
            .par_iter()
            .map(|r| {
                if r.kind == FileKind::Subtitle {
                    return None;
                }
                r.digests.get(&EQUIVALENCE_ALGO).map(|d| d.bytes.clone())
            })
            .collect();

        let mut groups: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
        for (i, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                groups.entry(key).or_default().push(i);
            }
        }

        let mut reports = Vec::new();
        for (key, mut indices) in groups {
            if indices.len() < 2 {
                continue;
            }
            indices.sort_by(|&a, &b| records[a].source_path.cmp(&records[b].source_path));
            for &i in &indices[1..] {
                records[i].extra = true;
            }
            let canonical = rename::rename(&records[indices[0]]).ok().flatten();
            reports.push(DuplicateGroup {
                key: crate::digest::Digest::new(EQUIVALENCE_ALGO, key).to_hex(),
                members: indices.iter().map(|&i| records[i].source_path.clone()).collect(),
                canonical_virtual_path: canonical,
            });
        }
        reports
    }

    /// Groups non-extra records (including subtitles) sharing a normalized
    /// title/season/episode key. The alphabetically-earliest path keeps
    /// `version = None`; the rest get "V2", "V3", … in path order and, if
    /// not a subtitle, `extra = true` (§9 open question: subtitles get a
    /// version but not the extra flag — different subtitle tracks for the
    /// same episode aren't duplicates of each other, so none gets hidden).
    fn title_pass(records: &mut [MetaRecord]) -> Vec<DuplicateGroup> {
        let keys: Vec<Option<String>> = records
            .par_iter()
            .map(|r| {
                if r.extra {
                    return None;
                }
                title_key(r)
            })
            .collect();

        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                groups.entry(key).or_default().push(i);
            }
        }

        let mut reports = Vec::new();
        for (key, mut indices) in groups {
            if indices.len() < 2 {
                continue;
            }
            indices.sort_by(|&a, &b| records[a].source_path.cmp(&records[b].source_path));
            for (version, &i) in indices.iter().enumerate().skip(1) {
                records[i].version = Some(format!("V{}", version + 1));
                if records[i].kind != FileKind::Subtitle {
                    records[i].extra = true;
                }
            }
            reports.push(DuplicateGroup {
                key: key.clone(),
                members: indices.iter().map(|&i| records[i].source_path.clone()).collect(),
                canonical_virtual_path: Some(key),
            });
        }
        reports
    }
}

fn title_key(r: &MetaRecord) -> Option<String> {
    let title = r.title.as_ref().or(r.original_title.as_ref())?;
    Some(format!(
        "{}|{}|{}",
        title.to_lowercase(),
        r.season.map(|s| s.to_string()).unwrap_or_default(),
        r.episode.map(|e| e.to_string()).unwrap_or_default()
    ))
}
