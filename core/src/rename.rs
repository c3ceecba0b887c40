//! C5 — RenameRule: `MetaRecord -> Option<String>`, the pure function that
//! derives a library-shaped virtual path from metadata.

use crate::error::{CatalogError, Result};
use crate::meta::{FileKind, MetaRecord};

/// Evaluate the rename policy (§4.5). Returns `Ok(None)` when the record's
/// kind simply isn't renameable (directories outside `{video, subtitle,
/// torrent}`); returns `Err` for preconditions that must "fail loud".
pub fn rename(meta: &MetaRecord) -> Result<Option<String>> {
    if !matches!(meta.kind, FileKind::Video | FileKind::Subtitle | FileKind::Torrent) {
        return Ok(None);
    }

    let ext = meta
        .source_path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| CatalogError::MalformedMeta {
            path: meta.source_path.clone(),
            reason: "missing extension".into(),
        })?;

    let title = resolve_title(meta)?;

    let file_name_stem = sanitize_component(&title);
    let mut file_name = file_name_stem.clone();

    // Embed the structural marker into the filename itself, not just the
    // directory: an episode carries its `S%02dE%02d`, a movie its year.
    if let (Some(season), Some(episode)) = (meta.season, meta.episode) {
        file_name.push_str(&format!(" S{season:02}E{episode:02}"));
    } else if let Some(year) = meta.year {
        file_name.push_str(&format!(" ({year})"));
    }

    if meta.kind == FileKind::Subtitle {
        if let Some(lang) = &meta.language {
            file_name.push('.');
            file_name.push_str(lang);
        }
    }
    file_name.push('.');
    file_name.push_str(ext);

    let is_extra = meta.attrs.get("extra").is_some() || meta.extra;

    let path = if is_extra {
        format!("TV Shows/{title}/extra/{file_name}")
    } else if let (Some(season), Some(episode)) = (meta.season, meta.episode) {
        format!("TV Shows/{title}/S{season:02}/{file_name}")
    } else {
        let year_suffix = meta.year.map(|y| format!(" ({y})")).unwrap_or_default();
        format!("Movies/{title}{year_suffix}/{file_name}")
    };

    Ok(Some(sanitize_path(&path)))
}

/// Prefer `titles["eng"]` (modeled as the `titles_eng` attr, since the
/// free-attribute bag is the only place translated-title maps live), else
/// `originalTitle`; missing and not a torrent fails loud.
fn resolve_title(meta: &MetaRecord) -> Result<String> {
    if let Some(title) = &meta.title {
        return Ok(title.clone());
    }
    if let Some(title) = &meta.original_title {
        return Ok(title.clone());
    }
    if meta.kind == FileKind::Torrent {
        return Ok(meta
            .source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("torrent")
            .to_string());
    }
    Err(CatalogError::MalformedMeta {
        path: meta.source_path.clone(),
        reason: "missing title".into(),
    })
}

/// Sanitizes a single path component (used for the title before it's
/// embedded into a larger path, so slashes in translated titles don't
/// silently create extra directories).
fn sanitize_component(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\')).collect()
}

/// Removes `<>:"|?*`, preserves a leading Windows drive specifier, and
/// normalizes slashes. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize_path(path: &str) -> String {
    let (drive, rest) = match path.as_bytes() {
        [letter, b':', b'\\' | b'/', ..] if letter.is_ascii_alphabetic() => {
            (path[..2].to_string(), &path[2..])
        }
        _ => (String::new(), path),
    };

    let normalized: String = rest
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();

    // Collapse any run of slashes introduced by stripped characters.
    let mut out = String::with_capacity(drive.len() + normalized.len());
    out.push_str(&drive);
    let mut last_was_slash = false;
    for c in normalized.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base(kind: FileKind, path: &str) -> MetaRecord {
        MetaRecord::new(PathBuf::from(path), kind)
    }

    #[test]
    fn movie_with_year() {
        let mut m = base(FileKind::Video, "/in/Dune.2021.mkv");
        m.title = Some("Dune".into());
        m.year = Some(2021);
        assert_eq!(rename(&m).unwrap().as_deref(), Some("Movies/Dune (2021)/Dune (2021).mkv"));
    }

    #[test]
    fn tv_episode_zero_padded_specials_season() {
        let mut m = base(FileKind::Video, "/in/show.mkv");
        m.title = Some("Show".into());
        m.season = Some(0);
        m.episode = Some(3);
        assert_eq!(rename(&m).unwrap().as_deref(), Some("TV Shows/Show/S00/Show S00E03.mkv"));
    }

    #[test]
    fn subtitle_gets_language_suffix() {
        let mut m = base(FileKind::Subtitle, "/in/show.srt");
        m.title = Some("Show".into());
        m.season = Some(1);
        m.episode = Some(2);
        m.language = Some("eng".into());
        assert_eq!(
            rename(&m).unwrap().as_deref(),
            Some("TV Shows/Show/S01/Show S01E02.eng.srt")
        );
    }

    #[test]
    fn extra_flag_wins_over_season_episode() {
        let mut m = base(FileKind::Video, "/in/show.mkv");
        m.title = Some("Show".into());
        m.season = Some(1);
        m.episode = Some(2);
        m.extra = true;
        assert_eq!(rename(&m).unwrap().as_deref(), Some("TV Shows/Show/extra/Show S01E02.mkv"));
    }

    #[test]
    fn missing_extension_fails_loud() {
        let mut m = base(FileKind::Video, "/in/noext");
        m.title = Some("X".into());
        assert!(matches!(rename(&m), Err(CatalogError::MalformedMeta { .. })));
    }

    #[test]
    fn missing_title_fails_loud_for_non_torrent() {
        let m = base(FileKind::Video, "/in/x.mkv");
        assert!(matches!(rename(&m), Err(CatalogError::MalformedMeta { .. })));
    }

    #[test]
    fn torrent_without_title_falls_back_to_file_stem() {
        let m = base(FileKind::Torrent, "/in/ubuntu.iso.torrent");
        assert!(rename(&m).unwrap().is_some());
    }

    #[test]
    fn other_kind_is_not_renameable() {
        let mut m = base(FileKind::Other, "/in/readme.txt");
        m.title = Some("Readme".into());
        assert_eq!(rename(&m).unwrap(), None);
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let raw = "Movies/Foo: Bar <Baz>/Foo.mkv";
        let once = sanitize_path(raw);
        let twice = sanitize_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitizer_preserves_windows_drive_specifier() {
        let raw = "C:\\Movies\\Foo\\Foo.mkv";
        assert_eq!(sanitize_path(raw), "C:/Movies/Foo/Foo.mkv");
    }
}
