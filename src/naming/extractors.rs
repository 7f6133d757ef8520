//! Default name extractors for file listings, NFO text and SFV listings.
//!
//! Extractors are pure string heuristics. Malformed or binary-looking input
//! simply yields no candidates.

/// Parses candidate release names out of one piece of evidence
pub trait NameExtractor: Send + Sync {
    /// Candidate names, in the order they appear in `blob`
    fn extract(&self, blob: &str) -> Vec<String>;
}

/// Extensions stripped from a file name before it is considered as a name
const KNOWN_EXTENSIONS: &[&str] = &[
    "rar", "zip", "7z", "par2", "nfo", "sfv", "nzb", "mkv", "avi", "mp4", "m4v", "wmv", "ts",
    "iso", "img", "bin", "cue", "mp3", "flac", "m4a", "m4b", "epub", "mobi", "pdf", "cbr", "cbz",
    "exe", "srt", "sub", "idx", "jpg", "png",
];

const MIN_NAME_LEN: usize = 8;

/// Candidate names from file names listed inside a release
///
/// One file name per call. Directory components and archive or media
/// extensions (including `.partNN` and `.rNN` volume markers) are removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileNameExtractor;

impl NameExtractor for FileNameExtractor {
    fn extract(&self, blob: &str) -> Vec<String> {
        file_stem(blob)
            .filter(|stem| looks_like_release_name(stem))
            .map(|stem| vec![stem.to_string()])
            .unwrap_or_default()
    }
}

/// Candidate names from the text of an NFO file
///
/// Picks out scene-style tokens such as `Some.Title.2020.1080p-GRP`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NfoExtractor;

impl NameExtractor for NfoExtractor {
    fn extract(&self, blob: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let tokens = blob.split(|c: char| {
            c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | '|' | ':' | '[' | ']')
        });
        for token in tokens {
            let token =
                token.trim_matches(|c: char| matches!(c, '.' | ',' | ';' | '(' | ')' | '*'));
            let token = file_stem(token).unwrap_or(token);
            if is_scene_name(token) && !names.iter().any(|n| n == token) {
                names.push(token.to_string());
            }
        }
        names
    }
}

/// Candidate names from an SFV checksum listing
///
/// Each non-comment line is `<file name> <crc32>`; the file names go through
/// the same cleanup as [`FileNameExtractor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SfvExtractor;

impl NameExtractor for SfvExtractor {
    fn extract(&self, blob: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for line in blob.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let file = match line.rsplit_once(char::is_whitespace) {
                Some((file, crc)) if is_crc32(crc) => file.trim(),
                _ => continue,
            };
            for name in FileNameExtractor.extract(file) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

fn is_crc32(s: &str) -> bool {
    s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Base name with volume markers and known extensions removed
fn file_stem(path: &str) -> Option<&str> {
    let mut stem = path.rsplit(['/', '\\']).next()?.trim();

    loop {
        let Some((rest, ext)) = stem.rsplit_once('.') else {
            break;
        };
        let lower = ext.to_ascii_lowercase();
        let strip = KNOWN_EXTENSIONS.contains(&lower.as_str())
            || is_numbered(&lower, "part")
            || is_numbered(&lower, "r")
            || (lower.len() == 3 && is_numbered(&lower, ""))
            || is_numbered_volume(&lower);
        if !strip || rest.is_empty() {
            break;
        }
        stem = rest;
    }

    (!stem.is_empty()).then_some(stem)
}

/// `<prefix><digits>`, e.g. `part01`, `r00`, `001`
fn is_numbered(ext: &str, prefix: &str) -> bool {
    ext.strip_prefix(prefix)
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// `vol03+04`
fn is_numbered_volume(ext: &str) -> bool {
    ext.strip_prefix("vol")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit() || c == '+'))
}

/// Loose check for a usable name: long enough, separated into words and not
/// an obfuscated hash
fn looks_like_release_name(name: &str) -> bool {
    if name.chars().count() < MIN_NAME_LEN {
        return false;
    }
    let separators = name.chars().filter(|c| matches!(c, '.' | '_' | '-' | ' ')).count();
    let letters = name.chars().filter(|c| c.is_alphabetic()).count();
    let hex_only = name
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | '-'))
        .all(|c| c.is_ascii_hexdigit());

    separators >= 2 && letters >= 3 && !hex_only
}

/// `Words.Joined.By.Dots-GROUP`
fn is_scene_name(token: &str) -> bool {
    if token.len() < MIN_NAME_LEN
        || !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '(' | ')'))
    {
        return false;
    }
    let Some((title, group)) = token.rsplit_once('-') else {
        return false;
    };
    let dots = title.matches('.').count();
    group.len() >= 2
        && group.chars().all(|c| c.is_ascii_alphanumeric())
        && dots >= 2
        && title.starts_with(|c: char| c.is_ascii_alphanumeric())
        && !title.contains("..")
        && looks_like_release_name(token)
}
