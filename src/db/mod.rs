//! Database layer for usenet-indexer
//!
//! Handles SQLite persistence for groups, binaries, parts, segments, releases,
//! categories, blacklist rules and NZB descriptors.
//!
//! Timestamps are stored as unix **microseconds** (UTC). Binaries cascade to
//! their parts and segments through `ON DELETE CASCADE`, so deleting a binary
//! row is the only statement needed to discard a posting.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`groups`] - Groups (sources) and recorded article gaps
//! - [`binaries`] - Binary ingestion, completion query, deletion
//! - [`releases`] - Release publication and post-processing updates
//! - [`blacklist`] - Blacklist rule storage
//! - [`categories`] - Category lookups
//! - [`evidence`] - Release files, NFO and SFV blobs used for renaming
//! - [`nzbs`] - NZB descriptor storage
//! - [`maintenance`] - Dead binary eviction and compaction

use crate::error::DatabaseError;
use crate::types::{BinaryId, GroupId, NzbId, ReleaseId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod binaries;
mod blacklist;
mod categories;
mod evidence;
mod groups;
mod maintenance;
mod migrations;
mod nzbs;
mod releases;

pub use evidence::ReleaseFile;
pub use nzbs::StoredNzb;

/// Group (upstream source) record from database
#[derive(Debug, Clone, FromRow)]
pub struct Group {
    /// Unique database ID
    pub id: GroupId,
    /// Group name, e.g. `alt.binaries.test`
    pub name: String,
    /// Whether the group is scanned
    pub active: bool,
}

/// New binary to be inserted by the ingestion layer
#[derive(Debug, Clone)]
pub struct NewBinary {
    /// Binary name parsed from the subject line
    pub name: String,
    /// Group the binary was posted to
    pub group_name: String,
    /// Poster
    pub posted_by: String,
    /// Posting timestamp
    pub posted: DateTime<Utc>,
    /// Declared number of parts
    pub total_parts: i32,
    /// Subject regex that produced this binary, if any
    pub regex_id: Option<i64>,
    /// Raw Xref header
    pub xref: Option<String>,
}

/// Binary record from database
#[derive(Debug, Clone, FromRow)]
pub struct Binary {
    /// Unique database ID
    pub id: BinaryId,
    /// Binary name
    pub name: String,
    /// Group the binary was posted to
    pub group_name: String,
    /// Poster
    pub posted_by: String,
    /// Posting timestamp (unix microseconds)
    pub posted: i64,
    /// Declared number of parts
    pub total_parts: i32,
    /// Subject regex that produced this binary, if any
    pub regex_id: Option<i64>,
    /// Raw Xref header
    pub xref: Option<String>,
    /// Ingestion timestamp (unix microseconds)
    pub created_at: i64,
}

impl Binary {
    /// Groups listed in the Xref header, falling back to the posting group
    pub fn groups(&self) -> Vec<String> {
        let parsed: Vec<String> = self
            .xref
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .filter_map(|entry| entry.split_once(':').map(|(group, _)| group.to_string()))
            .collect();

        if parsed.is_empty() {
            vec![self.group_name.clone()]
        } else {
            parsed
        }
    }
}

/// New part (one article of a posting)
#[derive(Debug, Clone)]
pub struct NewPart {
    /// Usenet message-ID of the first segment
    pub message_id: String,
    /// Subject line
    pub subject: String,
    /// Declared number of segments
    pub total_segments: i32,
    /// Posting timestamp
    pub posted: DateTime<Utc>,
}

/// Part record from database
#[derive(Debug, Clone, FromRow)]
pub struct Part {
    /// Unique database ID
    pub id: i64,
    /// Binary this part belongs to
    pub binary_id: BinaryId,
    /// Usenet message-ID of the first segment
    pub message_id: String,
    /// Subject line
    pub subject: String,
    /// Declared number of segments
    pub total_segments: i32,
    /// Posting timestamp (unix microseconds)
    pub posted: i64,
}

/// New segment
#[derive(Debug, Clone)]
pub struct NewSegment {
    /// Segment number within the part (1-based)
    pub segment: i32,
    /// Size in bytes
    pub size: i64,
    /// Usenet message-ID
    pub message_id: String,
}

/// Segment record from database
#[derive(Debug, Clone, FromRow)]
pub struct Segment {
    /// Unique database ID
    pub id: i64,
    /// Part this segment belongs to
    pub part_id: i64,
    /// Segment number within the part (1-based)
    pub segment: i32,
    /// Size in bytes
    pub size: i64,
    /// Usenet message-ID
    pub message_id: String,
}

/// A part together with its present segments
#[derive(Debug, Clone)]
pub struct PartContents {
    /// The part
    pub part: Part,
    /// Present segments, ordered by segment number
    pub segments: Vec<Segment>,
}

/// A binary fully loaded with its parts and segments
#[derive(Debug, Clone)]
pub struct BinaryContents {
    /// The binary
    pub binary: Binary,
    /// Parts, ordered by id
    pub parts: Vec<PartContents>,
}

impl BinaryContents {
    /// Aggregate size of all present segments in bytes
    pub fn size(&self) -> i64 {
        self.parts
            .iter()
            .flat_map(|p| p.segments.iter())
            .map(|s| s.size)
            .sum()
    }
}

/// Minimal projection returned by the completion query
#[derive(Debug, Clone, FromRow)]
pub struct CompletedBinary {
    /// Binary ID
    pub id: BinaryId,
    /// Binary name
    pub name: String,
    /// Posting timestamp (unix microseconds)
    pub posted: i64,
}

/// New release to be published
#[derive(Debug, Clone)]
pub struct NewRelease {
    /// Raw name (copied from the binary)
    pub name: String,
    /// Sanitized name used for searching
    pub search_name: String,
    /// Posting timestamp (unix microseconds, copied from the binary)
    pub posted: i64,
    /// Poster
    pub posted_by: String,
    /// Category
    pub category_id: i64,
    /// Group the release was posted to
    pub group_id: GroupId,
    /// Subject regex that produced the binary, if any
    pub regex_id: Option<i64>,
    /// Size in bytes
    pub size: i64,
    /// Stored NZB descriptor
    pub nzb_id: NzbId,
}

/// Release record from database
#[derive(Debug, Clone, FromRow)]
pub struct Release {
    /// Unique database ID
    pub id: ReleaseId,
    /// Raw name
    pub name: String,
    /// Sanitized name used for searching
    pub search_name: String,
    /// Posting timestamp (unix microseconds)
    pub posted: i64,
    /// Poster
    pub posted_by: String,
    /// Category
    pub category_id: i64,
    /// Group the release was posted to
    pub group_id: GroupId,
    /// Subject regex that produced the binary, if any
    pub regex_id: Option<i64>,
    /// Size in bytes
    pub size: i64,
    /// Number of times the NZB was fetched
    pub grabs: i64,
    /// Stored NZB descriptor
    pub nzb_id: Option<NzbId>,
    /// Password state (see [`crate::types::Passworded`])
    pub passworded: String,
    /// Flagged for deletion by post-processing
    pub unwanted: bool,
    /// Attached NFO blob
    pub nfo_id: Option<i64>,
    /// Attached SFV blob
    pub sfv_id: Option<i64>,
    /// When the release was published (unix microseconds)
    pub added: i64,
}

/// Category record from database
#[derive(Debug, Clone, FromRow)]
pub struct Category {
    /// Category ID
    pub id: i64,
    /// Parent category (None for parent buckets)
    pub parent_id: Option<i64>,
    /// Display name
    pub name: String,
}

/// Blacklist rule record from database
#[derive(Debug, Clone, FromRow)]
pub struct BlacklistRow {
    /// Unique database ID
    pub id: i64,
    /// Regex the group name must match
    pub group_name: String,
    /// Field the content regex is tested against (`subject`, `name`, `poster`)
    pub field: String,
    /// Content regex
    pub regex: String,
    /// Whether the rule is enabled
    pub status: bool,
    /// Free-form description
    pub description: Option<String>,
}

/// New blacklist rule
#[derive(Debug, Clone)]
pub struct NewBlacklistRule {
    /// Regex the group name must match
    pub group_name: String,
    /// Field the content regex is tested against
    pub field: String,
    /// Content regex
    pub regex: String,
    /// Whether the rule is enabled
    pub status: bool,
    /// Free-form description
    pub description: Option<String>,
}

/// Release projection used for post-hoc blacklist purges
#[derive(Debug, Clone, FromRow)]
pub struct ReleaseForBlacklist {
    /// Release ID
    pub id: ReleaseId,
    /// Raw name
    pub name: String,
    /// Poster
    pub posted_by: String,
    /// Name of the release's group
    pub group_name: String,
}

/// Database handle for usenet-indexer
pub struct Database {
    pool: SqlitePool,
}

/// Wrap a `sqlx` failure as a query error, keeping unique-key violations distinct
pub(crate) fn query_error(context: &str, e: sqlx::Error) -> crate::Error {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return crate::Error::Database(DatabaseError::ConstraintViolation(format!(
            "{}: {}",
            context, e
        )));
    }
    crate::Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
