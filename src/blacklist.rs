//! Blacklist rules applied to binaries before publication and to published
//! releases during post-processing.
//!
//! Rules are stored in the `blacklists` table. Each one pairs a group-name
//! pattern with a content pattern tested against one field of the candidate.
//! Both patterns are compiled once per load; rules that name an unknown field
//! or carry a pattern that doesn't compile are logged and skipped so a single
//! bad row never disables the remaining rules.

use crate::Result;
use crate::db::{Binary, BlacklistRow, Database, ReleaseForBlacklist};
use regex::{Regex, RegexBuilder};

/// Which attribute of a candidate a rule's content pattern is tested against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlacklistField {
    /// The binary (or release) name; stored as `subject` or `name`
    Name,
    /// The poster; stored as `poster` or `posted_by`
    Poster,
}

impl BlacklistField {
    /// Resolve the stored field name
    pub fn parse(field: &str) -> Option<Self> {
        match field.trim().to_ascii_lowercase().as_str() {
            "subject" | "name" => Some(Self::Name),
            "poster" | "posted_by" => Some(Self::Poster),
            _ => None,
        }
    }
}

/// A compiled, enabled blacklist rule
#[derive(Debug)]
pub struct BlacklistRule {
    /// Database ID of the rule
    pub id: i64,
    /// Field the content pattern applies to
    pub field: BlacklistField,
    group: Regex,
    pattern: Regex,
}

impl BlacklistRule {
    fn matches(&self, group_name: &str, name: &str, poster: &str) -> bool {
        if !self.group.is_match(group_name) {
            return false;
        }
        let value = match self.field {
            BlacklistField::Name => name,
            BlacklistField::Poster => poster,
        };
        self.pattern.is_match(value)
    }
}

/// The set of enabled blacklist rules, in id order
#[derive(Debug, Default)]
pub struct BlacklistFilter {
    rules: Vec<BlacklistRule>,
}

impl BlacklistFilter {
    /// Load enabled rules for filtering binaries (case-sensitive)
    pub async fn load(db: &Database) -> Result<Self> {
        let rows = db.enabled_blacklist_rules().await?;
        Ok(Self::from_rows(&rows, false))
    }

    /// Load enabled rules for purging published releases (case-insensitive)
    pub async fn load_for_releases(db: &Database) -> Result<Self> {
        let rows = db.enabled_blacklist_rules().await?;
        Ok(Self::from_rows(&rows, true))
    }

    /// Compile rows into rules, skipping the ones that can't be used
    pub fn from_rows(rows: &[BlacklistRow], case_insensitive: bool) -> Self {
        let rules = rows
            .iter()
            .filter(|row| row.status)
            .filter_map(|row| {
                let Some(field) = BlacklistField::parse(&row.field) else {
                    tracing::warn!(
                        rule_id = row.id,
                        field = %row.field,
                        "Unknown blacklist field, skipping rule"
                    );
                    return None;
                };
                let group = compile(row.id, &row.group_name, case_insensitive)?;
                let pattern = compile(row.id, &row.regex, case_insensitive)?;
                Some(BlacklistRule {
                    id: row.id,
                    field,
                    group,
                    pattern,
                })
            })
            .collect();

        Self { rules }
    }

    /// First rule matching a binary
    pub fn matches(&self, binary: &Binary) -> Option<&BlacklistRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(&binary.group_name, &binary.name, &binary.posted_by))
    }

    /// First rule matching a published release
    pub fn matches_release(&self, release: &ReleaseForBlacklist) -> Option<&BlacklistRule> {
        self.rules
            .iter()
            .find(|rule| rule.matches(&release.group_name, &release.name, &release.posted_by))
    }

    /// Number of usable rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are usable
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile(rule_id: i64, pattern: &str, case_insensitive: bool) -> Option<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(1024 * 1024)
        .build()
        .map_err(|e| {
            tracing::warn!(rule_id, pattern, error = %e, "Invalid blacklist pattern, skipping rule");
        })
        .ok()
}
