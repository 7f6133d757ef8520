//! Release name cleanup and correction
//!
//! Two concerns live here:
//!
//! - [`sanitize_release_name`] turns a raw binary name into the search name
//!   stored on a release.
//! - [`NameResolver`] re-examines a published release using secondary
//!   evidence (files inside the release, its NFO, its SFV) and decides whether
//!   a better name and category exist.
//!
//! ## Resolution rules
//!
//! Candidates are gathered in a fixed order: the current search name, then
//! names from each release file, then the NFO, then the SFV. With a single
//! candidate there is nothing to compare and the result is
//! [`NameResolution::NoCandidate`].
//!
//! Otherwise the current search name is re-classified. If that lands outside
//! the miscellaneous bucket the name is trusted and the result is
//! [`NameResolution::Keep`] with the recomputed category. If it lands in the
//! miscellaneous bucket, the remaining candidates are tried in order and the
//! first one whose own category is not miscellaneous and either shares the
//! declared category's parent or replaces a miscellaneous declared category
//! wins. Later candidates are never examined.

mod extractors;

pub use extractors::{FileNameExtractor, NameExtractor, NfoExtractor, SfvExtractor};

use crate::category::{CategoryId, Classifier};
use std::sync::Arc;

/// Characters removed outright from release names
const STRIPPED_CHARS: &[char] = &['#', '@', '$', '%', '^', '§', '¨', '©', 'Ö'];

/// Clean a raw binary name into a search name
///
/// Removes `# @ $ % ^ § ¨ © Ö` and turns `_`, `.` and `-` into spaces.
/// Applying it twice gives the same result as applying it once.
///
/// ```
/// use usenet_indexer::naming::sanitize_release_name;
///
/// assert_eq!(sanitize_release_name("Some.Release-GRP"), "Some Release GRP");
/// ```
pub fn sanitize_release_name(name: &str) -> String {
    name.chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .map(|c| match c {
            '_' | '.' | '-' => ' ',
            other => other,
        })
        .collect()
}

/// Evidence gathered for one release
#[derive(Debug, Clone)]
pub struct ReleaseEvidence {
    /// Release ID, for logging
    pub release_id: i64,
    /// Current search name
    pub search_name: String,
    /// Category currently assigned to the release
    pub category: CategoryId,
    /// File names listed inside the release
    pub files: Vec<String>,
    /// NFO text, if one is attached
    pub nfo: Option<String>,
    /// SFV listing, if one is attached
    pub sfv: Option<String>,
}

/// Outcome of [`NameResolver::discover_name`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameResolution {
    /// A better name was found
    Rename {
        /// Replacement search name
        name: String,
        /// Category of the replacement name
        category: CategoryId,
    },
    /// The current name classifies fine; only its category is recomputed
    Keep {
        /// Category recomputed from the current name
        category: CategoryId,
    },
    /// No candidate qualified
    NoCandidate,
}

/// Picks a replacement name for a release from its secondary evidence
pub struct NameResolver {
    classifier: Arc<dyn Classifier>,
    files: Box<dyn NameExtractor>,
    nfo: Box<dyn NameExtractor>,
    sfv: Box<dyn NameExtractor>,
}

impl NameResolver {
    /// Create a resolver using the default extractors
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            files: Box::new(FileNameExtractor),
            nfo: Box::new(NfoExtractor),
            sfv: Box::new(SfvExtractor),
        }
    }

    /// Replace the extractors (file names, NFO text, SFV listing)
    pub fn with_extractors(
        mut self,
        files: Box<dyn NameExtractor>,
        nfo: Box<dyn NameExtractor>,
        sfv: Box<dyn NameExtractor>,
    ) -> Self {
        self.files = files;
        self.nfo = nfo;
        self.sfv = sfv;
        self
    }

    /// All candidate names in precedence order, current name first
    pub fn candidates(&self, evidence: &ReleaseEvidence) -> Vec<String> {
        let mut candidates = vec![evidence.search_name.clone()];
        for file in &evidence.files {
            candidates.extend(self.files.extract(file));
        }
        if let Some(nfo) = &evidence.nfo {
            candidates.extend(self.nfo.extract(nfo));
        }
        if let Some(sfv) = &evidence.sfv {
            candidates.extend(self.sfv.extract(sfv));
        }
        candidates
    }

    /// Decide whether the release should be renamed
    ///
    /// Names are classified without group context.
    pub fn discover_name(&self, evidence: &ReleaseEvidence) -> NameResolution {
        let candidates = self.candidates(evidence);
        if candidates.len() <= 1 {
            tracing::info!(
                release_id = evidence.release_id,
                search_name = %evidence.search_name,
                "No name candidates"
            );
            return NameResolution::NoCandidate;
        }

        let declared = evidence.category;
        let recomputed = self.classifier.classify(&evidence.search_name, None);

        if !recomputed.is_misc() {
            tracing::info!(
                release_id = evidence.release_id,
                search_name = %evidence.search_name,
                category = %recomputed,
                "Old name was fine"
            );
            return NameResolution::Keep {
                category: recomputed,
            };
        }

        for name in candidates.into_iter().skip(1) {
            let category = self.classifier.classify(&name, None);
            if category.is_misc() {
                continue;
            }
            if category.parent() == declared.parent() || declared.is_misc() {
                tracing::info!(
                    release_id = evidence.release_id,
                    search_name = %evidence.search_name,
                    new_name = %name,
                    declared = %declared,
                    recomputed = %recomputed,
                    category = %category,
                    "Renaming release"
                );
                return NameResolution::Rename { name, category };
            }
        }

        tracing::info!(
            release_id = evidence.release_id,
            search_name = %evidence.search_name,
            "No good name candidates"
        );
        NameResolution::NoCandidate
    }
}
