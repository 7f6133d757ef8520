//! Category identifiers and title classification
//!
//! Category ids follow the newznab numbering: every id is decimal coded with a
//! parent bucket width of 1000, so `5040` (TV > HD) lives in bucket `5000`
//! (TV). The convention is kept explicit in [`CategoryId::parent`]; the
//! `categories` table additionally stores the parent id as its own column.

use crate::config::CategoryConfig;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Width of a parent bucket in the category numbering
pub const PARENT_BUCKET_WIDTH: i64 = 1000;

/// A category identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub i64);

impl CategoryId {
    /// Console
    pub const PARENT_CONSOLE: CategoryId = CategoryId(1000);
    /// Movies
    pub const PARENT_MOVIE: CategoryId = CategoryId(2000);
    /// Audio
    pub const PARENT_AUDIO: CategoryId = CategoryId(3000);
    /// PC
    pub const PARENT_PC: CategoryId = CategoryId(4000);
    /// TV
    pub const PARENT_TV: CategoryId = CategoryId(5000);
    /// XXX
    pub const PARENT_XXX: CategoryId = CategoryId(6000);
    /// Books
    pub const PARENT_BOOK: CategoryId = CategoryId(7000);
    /// Miscellaneous: titles that could not be classified
    pub const PARENT_MISC: CategoryId = CategoryId(8000);
    /// Books > Ebook
    pub const BOOK_EBOOK: CategoryId = CategoryId(7020);
    /// Misc > Other, the fallback for unclassifiable titles
    pub const MISC_OTHER: CategoryId = CategoryId(8010);

    /// The parent bucket this category belongs to
    pub fn parent(self) -> CategoryId {
        CategoryId(self.0.div_euclid(PARENT_BUCKET_WIDTH) * PARENT_BUCKET_WIDTH)
    }

    /// Whether the category sits in the miscellaneous bucket
    pub fn is_misc(self) -> bool {
        self.parent() == Self::PARENT_MISC
    }

    /// Get the inner i64 value
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for CategoryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a title (and optionally the group it was posted to) onto a category
///
/// Implementations must be deterministic: the same inputs always yield the
/// same category. The name resolver relies on this to compare a release's
/// original classification with the classification of candidate names.
pub trait Classifier: Send + Sync {
    /// Classify a title
    fn classify(&self, name: &str, group: Option<&str>) -> CategoryId;
}

struct CompiledCategoryRule {
    pattern: Regex,
    groups: Option<Regex>,
    category: CategoryId,
}

/// Default classifier driven by the `[categories]` configuration
///
/// Rules are tried in order and the first rule whose pattern matches the name
/// (and whose group pattern, if any, matches the group) decides. Titles no rule
/// recognises land in [`CategoryId::MISC_OTHER`]. A rule with a group pattern
/// never matches when no group is supplied.
pub struct PatternClassifier {
    rules: Vec<CompiledCategoryRule>,
}

impl PatternClassifier {
    /// Compile the configured rules; invalid patterns are logged and skipped
    pub fn new(config: &CategoryConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter_map(|rule| {
                let pattern = compile(&rule.pattern)?;
                let groups = match &rule.groups {
                    Some(g) => Some(compile(g)?),
                    None => None,
                };
                Some(CompiledCategoryRule {
                    pattern,
                    groups,
                    category: CategoryId(rule.category),
                })
            })
            .collect();

        Self { rules }
    }

    /// Number of usable rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules compiled
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(1024 * 1024)
        .build()
        .map_err(|e| {
            tracing::warn!(pattern, error = %e, "Invalid category pattern, skipping rule");
        })
        .ok()
}

impl Classifier for PatternClassifier {
    fn classify(&self, name: &str, group: Option<&str>) -> CategoryId {
        self.rules
            .iter()
            .find(|rule| {
                let group_ok = match (&rule.groups, group) {
                    (None, _) => true,
                    (Some(pattern), Some(group)) => pattern.is_match(group),
                    (Some(_), None) => false,
                };
                group_ok && rule.pattern.is_match(name)
            })
            .map(|rule| rule.category)
            .unwrap_or(CategoryId::MISC_OTHER)
    }
}
