//! §4.3 sidecar generation: two active formats (`.meta` YAML, `.nfo`
//! Jellyfin-compatible XML), each a pure function of `(MetaRecord, format)`.
//! §9: "two values of a tag enum each bound to a serializer function;
//! adding a format is a new variant plus registration, no base-class
//! hierarchy."

use serde::Serialize;

use crate::meta::MetaRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SidecarFormat {
    Meta,
    Nfo,
}

impl SidecarFormat {
    pub fn all() -> &'static [SidecarFormat] {
        &[SidecarFormat::Meta, SidecarFormat::Nfo]
    }

    pub fn extension(self) -> &'static str {
        match self {
            SidecarFormat::Meta => ".meta",
            SidecarFormat::Nfo => ".nfo",
        }
    }

    /// Generate the sidecar's content. Pure function of the embedded
    /// record — same inputs always produce the same bytes.
    pub fn generate(self, meta: &MetaRecord) -> Vec<u8> {
        match self {
            SidecarFormat::Meta => generate_meta_yaml(meta),
            SidecarFormat::Nfo => generate_nfo_xml(meta),
        }
    }
}

fn generate_meta_yaml(meta: &MetaRecord) -> Vec<u8> {
    serde_yaml::to_string(meta).unwrap_or_default().into_bytes()
}

/// Filtered subset for Jellyfin: titles, ids, rating, plot, studio,
/// releasedate, mpaa, genre, tag, language, poster, fanart.
#[derive(Serialize, Default)]
struct NfoBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    originaltitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    episode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    studio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    releasedate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mpaa: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    genre: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    tag: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fanart: Option<String>,
}

fn attr_str(meta: &MetaRecord, key: &str) -> Option<String> {
    use crate::meta::AttrValue;
    match meta.attrs.get(key)? {
        AttrValue::String(s) => Some(s.clone()),
        AttrValue::Number(n) => Some(n.to_string()),
        AttrValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn attr_f64(meta: &MetaRecord, key: &str) -> Option<f64> {
    use crate::meta::AttrValue;
    match meta.attrs.get(key)? {
        AttrValue::Number(n) => Some(*n),
        _ => None,
    }
}

fn attr_str_list(meta: &MetaRecord, key: &str) -> Vec<String> {
    use crate::meta::AttrValue;
    match meta.attrs.get(key) {
        Some(AttrValue::List(items)) => items
            .iter()
            .filter_map(|v| match v {
                AttrValue::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Some(AttrValue::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn generate_nfo_xml(meta: &MetaRecord) -> Vec<u8> {
    let is_episode = meta.episode.is_some() || attr_str(meta, "videoType").as_deref() == Some("tvshow");
    let root_tag = if is_episode { "episodedetails" } else { "movie" };

    let body = NfoBody {
        title: meta.title.clone(),
        originaltitle: meta.original_title.clone(),
        season: if is_episode { meta.season } else { None },
        episode: if is_episode { meta.episode } else { None },
        rating: attr_f64(meta, "rating"),
        plot: attr_str(meta, "plot"),
        studio: attr_str(meta, "studio"),
        releasedate: attr_str(meta, "releasedate"),
        mpaa: attr_str(meta, "mpaa"),
        genre: attr_str_list(meta, "genre"),
        tag: attr_str_list(meta, "tag"),
        language: meta.language.clone(),
        poster: attr_str(meta, "poster"),
        fanart: attr_str(meta, "fanart"),
    };

    quick_xml::se::to_string_with_root(root_tag, &body).unwrap_or_default().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AttrValue, FileKind};
    use std::path::PathBuf;

    fn episode_meta() -> MetaRecord {
        let mut m = MetaRecord::new(PathBuf::from("/in/show.s01e02.mkv"), FileKind::Video);
        m.title = Some("Show".into());
        m.season = Some(1);
        m.episode = Some(2);
        m.attrs.insert("genre".into(), AttrValue::List(vec![AttrValue::String("Drama".into())]));
        m
    }

    #[test]
    fn episode_uses_episodedetails_root() {
        let xml = String::from_utf8(generate_nfo_xml(&episode_meta())).unwrap();
        assert!(xml.starts_with("<episodedetails>"));
        assert!(xml.contains("<season>1</season>"));
        assert!(xml.contains("<genre>Drama</genre>"));
    }

    #[test]
    fn movie_uses_movie_root() {
        let mut m = MetaRecord::new(PathBuf::from("/in/dune.mkv"), FileKind::Video);
        m.title = Some("Dune".into());
        let xml = String::from_utf8(generate_nfo_xml(&m)).unwrap();
        assert!(xml.starts_with("<movie>"));
        assert!(!xml.contains("<season>"));
    }

    #[test]
    fn yaml_sidecar_round_trips_through_parse() {
        let m = episode_meta();
        let yaml = generate_meta_yaml(&m);
        let parsed: MetaRecord = serde_yaml::from_slice(&yaml).unwrap();
        assert_eq!(parsed.title, m.title);
        assert_eq!(parsed.season, m.season);
    }

    #[test]
    fn yaml_sidecar_is_idempotent_under_reparse() {
        let m = episode_meta();
        let once = generate_meta_yaml(&m);
        let parsed: MetaRecord = serde_yaml::from_slice(&once).unwrap();
        let twice = generate_meta_yaml(&parsed);
        assert_eq!(once, twice);
    }
}
