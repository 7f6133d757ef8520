//! Subject-line classification for archive and metadata files.
//!
//! Usenet subjects carry the posted file name somewhere inside them, usually
//! quoted: `Some.Release [03/40] - "some.release.part03.rar" yEnc (1/120)`.
//! The helpers here look for file extensions inside such lines without parsing
//! the whole subject. All checks are ASCII case-insensitive.
//!
//! The archive-count gate of the release pipeline is built from these:
//! multi-volume RAR parts and ZIP volumes count towards the minimum, anything
//! that looks like PAR2/SFV/NZB metadata does not.

/// Characters that may close a file name inside a subject line
fn is_closer(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b')' | b']')
}

/// Characters that may open a file name inside a subject line
fn is_opener(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'(' | b'[')
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte offsets of every `.` followed by `ext` (already lowercase)
fn extension_hits<'a>(lower: &'a str, ext: &'a str) -> impl Iterator<Item = usize> + 'a {
    lower
        .match_indices('.')
        .map(|(i, _)| i)
        .filter(move |&i| lower[i + 1..].starts_with(ext))
}

/// Whether the subject names a RAR volume: `.rar`, `.r00` or `.r000`,
/// not followed by another extension
pub fn is_rar_part(subject: &str) -> bool {
    let lower = subject.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    lower.match_indices('.').any(|(i, _)| {
        let rest = &bytes[i + 1..];
        if rest.starts_with(b"rar") {
            return rest.get(3) != Some(&b'.');
        }
        if rest.first() != Some(&b'r') {
            return false;
        }
        let digits = rest[1..].iter().take_while(|b| b.is_ascii_digit()).count();
        match digits {
            0 | 1 => false,
            2 => rest.get(3) != Some(&b'.'),
            // `.r123` always has a two-digit prefix that is not followed by a dot
            _ => true,
        }
    })
}

/// Whether the subject names a ZIP file not followed by another extension
pub fn is_zip(subject: &str) -> bool {
    let lower = subject.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    extension_hits(&lower, "zip").any(|i| bytes.get(i + 4) != Some(&b'.'))
}

/// Whether the subject names a PAR2, PAR2 recovery volume, SFV or NZB file
pub fn is_metadata(subject: &str) -> bool {
    let lower = subject.to_ascii_lowercase();
    if ["par2", "sfv", "nzb"]
        .iter()
        .any(|ext| extension_hits(&lower, ext).next().is_some())
    {
        return true;
    }
    extension_hits(&lower, "vol").any(|i| is_volume_suffix(&lower.as_bytes()[i + 4..]))
}

/// `<digits>+`, as in `.vol03+04.par2`
fn is_volume_suffix(rest: &[u8]) -> bool {
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    digits > 0 && rest.get(digits) == Some(&b'+')
}

/// Whether the subject names a PAR2 file not followed by another extension
pub fn is_par2(subject: &str) -> bool {
    let lower = subject.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    extension_hits(&lower, "par2").any(|i| bytes.get(i + 5) != Some(&b'.'))
}

/// Whether the subject names a PAR2 recovery volume (`vol03+04`)
pub fn is_par2_volume(subject: &str) -> bool {
    let lower = subject.to_ascii_lowercase();
    lower
        .match_indices("vol")
        .any(|(i, _)| is_volume_suffix(&lower.as_bytes()[i + 3..]))
}

/// Whether a delimited file name ending in one of `exts` appears in the subject
fn has_delimited_file(subject: &str, exts: &[&str]) -> bool {
    let lower = subject.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    exts.iter().any(|ext| {
        extension_hits(&lower, ext).any(|i| {
            let closed = bytes.get(i + 1 + ext.len()).copied().is_some_and(is_closer);
            closed && bytes[..i].iter().copied().any(is_opener)
        })
    })
}

/// Whether the subject names an NFO file (or its reversed spelling)
pub fn is_nfo(subject: &str) -> bool {
    has_delimited_file(subject, &["nfo", "ofn"])
}

/// Whether the subject names an SFV file (or its reversed spelling)
pub fn is_sfv(subject: &str) -> bool {
    has_delimited_file(subject, &["sfv", "vfs"])
}

/// Whether the subject names the first volume of a RAR set
///
/// Accepts `name.rar`, `name.part01.rar` and `name.001` when followed by a
/// closing delimiter; rejects later `partNN` volumes.
pub fn is_first_volume(subject: &str) -> bool {
    let lower = subject.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    ["rar", "001"].iter().any(|ext| {
        extension_hits(&lower, ext).any(|dot| {
            if !bytes.get(dot + 4).copied().is_some_and(is_closer) {
                return false;
            }
            // The stem runs back to the previous dot and must start right
            // after some non-word character.
            let run_start = lower[..dot].rfind('.').map_or(0, |p| p + 1);
            let run = &lower[run_start..dot];
            let preceded_by_dot = run_start > 0;

            run.char_indices().any(|(offset, _)| {
                let starts_after_non_word = if offset == 0 {
                    preceded_by_dot
                } else {
                    run[..offset].chars().next_back().is_some_and(|c| !is_word(c))
                };
                starts_after_non_word && is_first_volume_stem(&run[offset..])
            })
        })
    })
}

/// `part0*1`, or anything that does not look like a numbered part
fn is_first_volume_stem(stem: &str) -> bool {
    let Some(number) = stem.strip_prefix("part") else {
        return true;
    };
    if !number.starts_with(|c: char| c.is_ascii_digit()) {
        return true;
    }
    let trimmed = number.trim_start_matches('0');
    trimmed == "1"
}

/// Archive-like files counted over the parts of one binary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveCounts {
    /// Parts naming a RAR volume
    pub rar_parts: u32,
    /// Parts naming the first volume of a RAR set (excluding metadata)
    pub first_volumes: u32,
    /// Parts naming a ZIP file (excluding metadata)
    pub zips: u32,
    /// Parts naming a PAR2 file
    pub pars: u32,
    /// Parts naming an NFO file
    pub nfos: u32,
    /// Parts naming an SFV file
    pub sfvs: u32,
}

impl ArchiveCounts {
    /// Count matches over a sequence of subject lines
    pub fn from_subjects<'a>(subjects: impl IntoIterator<Item = &'a str>) -> Self {
        let mut counts = Self::default();
        for subject in subjects {
            let metadata = is_metadata(subject);
            if is_rar_part(subject) {
                counts.rar_parts += 1;
            }
            if is_first_volume(subject) && !metadata {
                counts.first_volumes += 1;
            }
            if is_zip(subject) && !metadata {
                counts.zips += 1;
            }
            if is_par2(subject) {
                counts.pars += 1;
            }
            if is_nfo(subject) && !metadata {
                counts.nfos += 1;
            }
            if is_sfv(subject) {
                counts.sfvs += 1;
            }
        }
        counts
    }

    /// Parts that count towards the minimum archive gate
    pub fn archives(&self) -> u32 {
        self.rar_parts + self.zips
    }
}
