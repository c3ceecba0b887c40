//! `Tokenizer`: pulls title/season/episode/year/language hints out of a
//! bare file name during the light stage, before any metadata source has
//! spoken. §1 lists filename-tokenizing heuristics as out of scope as a
//! sophisticated feature, but stage-2 still needs *some* preliminary
//! metadata to exercise `RenameRule` (§4.8), so this recognizes common
//! scene-release conventions rather than consulting a content database.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenHints {
    pub title: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u32>,
    pub language: Option<String>,
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, file_name: &str) -> TokenHints;
}

fn season_episode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[. _-]s(\d{1,2})e(\d{1,3})").unwrap())
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9]|$)").unwrap())
}

/// Trailing `.eng.srt` / `.fre.srt`-style two/three-letter language code
/// immediately before the extension, subtitle files only.
fn language_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.([a-z]{2,3})\.[a-z0-9]+$").unwrap())
}

/// Release-tag tokens stripped off the end of a title once the structural
/// markers (season/episode, year) have been located — not exhaustive, just
/// the common scene-release vocabulary.
const NOISE_WORDS: &[&str] = &[
    "1080p", "2160p", "720p", "480p", "x264", "x265", "h264", "h265", "hevc", "web", "webrip",
    "web-dl", "webdl", "bluray", "brrip", "dvdrip", "hdtv", "amzn", "ddp5", "aac", "ac3", "hdr",
];

/// The default filename tokenizer: `S01E02`-style season/episode, a
/// plausible four-digit year (1900-2099), a subtitle language suffix, and
/// a title guessed from whatever text precedes the first structural marker
/// (scene releases separate fields with `.`/`_`/`-`/space).
#[derive(Default)]
pub struct DefaultTokenizer;

impl Tokenizer for DefaultTokenizer {
    fn tokenize(&self, file_name: &str) -> TokenHints {
        let mut hints = TokenHints::default();
        let stem = file_name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file_name);

        let mut cut = stem.len();

        if let Some(caps) = season_episode_re().captures(stem) {
            hints.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
            hints.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
            cut = cut.min(caps.get(0).unwrap().start());
        }

        if let Some(caps) = year_re().captures(stem) {
            hints.year = caps.get(1).and_then(|m| m.as_str().parse().ok());
            cut = cut.min(caps.get(1).unwrap().start());
        }

        if let Some(caps) = language_re().captures(file_name) {
            hints.language = caps.get(1).map(|m| m.as_str().to_lowercase());
        }

        hints.title = extract_title(&stem[..cut]);
        hints
    }
}

/// Turns the portion of the stem before any structural marker into a
/// human-looking title: separators become spaces, trailing release-tag
/// noise words are dropped, words are title-cased.
fn extract_title(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw
        .split(|c: char| c == '.' || c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();

    let mut end = words.len();
    while end > 0 && NOISE_WORDS.contains(&words[end - 1].to_lowercase().as_str()) {
        end -= 1;
    }
    if end == 0 {
        return None;
    }

    let title = words[..end]
        .iter()
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_season_and_episode() {
        let hints = DefaultTokenizer.tokenize("Show.Name.S02E05.1080p.mkv");
        assert_eq!(hints.season, Some(2));
        assert_eq!(hints.episode, Some(5));
        assert_eq!(hints.title.as_deref(), Some("Show Name"));
    }

    #[test]
    fn extracts_year() {
        let hints = DefaultTokenizer.tokenize("Dune.2021.2160p.mkv");
        assert_eq!(hints.year, Some(2021));
        assert_eq!(hints.title.as_deref(), Some("Dune"));
    }

    #[test]
    fn extracts_subtitle_language_suffix() {
        let hints = DefaultTokenizer.tokenize("Show.Name.S01E02.eng.srt");
        assert_eq!(hints.language.as_deref(), Some("eng"));
    }

    #[test]
    fn title_only_file_still_gets_a_title() {
        let hints = DefaultTokenizer.tokenize("readme.txt");
        assert_eq!(hints.title.as_deref(), Some("Readme"));
        assert_eq!(hints.season, None);
        assert_eq!(hints.year, None);
    }

    #[test]
    fn pure_noise_name_has_no_derivable_title() {
        let hints = DefaultTokenizer.tokenize("1080p.mkv");
        assert_eq!(hints.title, None);
    }
}
