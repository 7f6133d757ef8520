//! Binary ingestion, the completion query and binary deletion.

use crate::Result;
use crate::types::{BinaryId, to_micros};

use super::{
    Binary, BinaryContents, CompletedBinary, Database, NewBinary, NewPart, NewSegment, Part,
    PartContents, Segment, query_error,
};

impl Database {
    /// Insert a new binary
    pub async fn insert_binary(&self, binary: &NewBinary) -> Result<BinaryId> {
        let now = to_micros(chrono::Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO binaries (
                name, group_name, posted_by, posted, total_parts, regex_id, xref, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&binary.name)
        .bind(&binary.group_name)
        .bind(&binary.posted_by)
        .bind(to_micros(binary.posted))
        .bind(binary.total_parts)
        .bind(binary.regex_id)
        .bind(&binary.xref)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert binary", e))?;

        Ok(BinaryId(result.last_insert_rowid()))
    }

    /// Insert a part belonging to a binary
    pub async fn insert_part(&self, binary_id: BinaryId, part: &NewPart) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO parts (binary_id, message_id, subject, total_segments, posted)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(binary_id)
        .bind(&part.message_id)
        .bind(&part.subject)
        .bind(part.total_segments)
        .bind(to_micros(part.posted))
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert part", e))?;

        Ok(result.last_insert_rowid())
    }

    /// Insert segments of a part in batches
    ///
    /// Segments already present (same part and number) are ignored, so a
    /// re-scan of the same articles is harmless.
    pub async fn insert_segments(&self, part_id: i64, segments: &[NewSegment]) -> Result<()> {
        if segments.is_empty() {
            return Ok(());
        }

        // SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999; each segment binds 4 values.
        const MAX_SEGMENTS_PER_BATCH: usize = 249;

        for chunk in segments.chunks(MAX_SEGMENTS_PER_BATCH) {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT OR IGNORE INTO segments (part_id, segment, size, message_id) ",
            );

            query_builder.push_values(chunk, |mut b, segment| {
                b.push_bind(part_id)
                    .push_bind(segment.segment)
                    .push_bind(segment.size)
                    .push_bind(&segment.message_id);
            });

            query_builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("Failed to insert segments batch", e))?;
        }

        Ok(())
    }

    /// Binaries whose parts and segments are complete enough to finalize
    ///
    /// A binary qualifies when the number of parts with at least one present
    /// segment reaches its declared part count and
    /// `100 * present_segments / declared_segments >= min_completion` over all
    /// of those parts. The ratio is computed in floating point so that 99%
    /// is not rounded up or down to a neighbouring integer. Ordered by id.
    pub async fn completed_binaries(&self, min_completion: f64) -> Result<Vec<CompletedBinary>> {
        let rows = sqlx::query_as::<_, CompletedBinary>(
            r#"
            SELECT
                binaries.id, binaries.name, binaries.posted
            FROM binaries
            INNER JOIN (
                SELECT
                    parts.id, parts.binary_id, parts.total_segments,
                    COUNT(segments.id) AS available_segments
                FROM parts
                    INNER JOIN segments ON parts.id = segments.part_id
                GROUP BY parts.id
            ) AS part_counts
                ON binaries.id = part_counts.binary_id
            GROUP BY binaries.id
            HAVING COUNT(*) >= binaries.total_parts
                AND 100.0 * SUM(part_counts.available_segments)
                    / SUM(part_counts.total_segments) >= ?
            ORDER BY binaries.id
            "#,
        )
        .bind(min_completion)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to query completed binaries", e))?;

        Ok(rows)
    }

    /// Get a binary by ID
    pub async fn get_binary(&self, id: BinaryId) -> Result<Option<Binary>> {
        let row = sqlx::query_as::<_, Binary>(
            r#"
            SELECT
                id, name, group_name, posted_by, posted, total_parts,
                regex_id, xref, created_at
            FROM binaries
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get binary", e))?;

        Ok(row)
    }

    /// Load a binary with all of its parts and segments
    pub async fn get_binary_contents(&self, id: BinaryId) -> Result<Option<BinaryContents>> {
        let Some(binary) = self.get_binary(id).await? else {
            return Ok(None);
        };

        let parts = sqlx::query_as::<_, Part>(
            r#"
            SELECT id, binary_id, message_id, subject, total_segments, posted
            FROM parts
            WHERE binary_id = ?
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get parts", e))?;

        let segments = sqlx::query_as::<_, Segment>(
            r#"
            SELECT segments.id, segments.part_id, segments.segment, segments.size, segments.message_id
            FROM segments
                INNER JOIN parts ON parts.id = segments.part_id
            WHERE parts.binary_id = ?
            ORDER BY segments.part_id, segments.segment
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get segments", e))?;

        let mut by_part: std::collections::HashMap<i64, Vec<Segment>> =
            std::collections::HashMap::new();
        for segment in segments {
            by_part.entry(segment.part_id).or_default().push(segment);
        }

        let parts = parts
            .into_iter()
            .map(|part| PartContents {
                segments: by_part.remove(&part.id).unwrap_or_default(),
                part,
            })
            .collect();

        Ok(Some(BinaryContents { binary, parts }))
    }

    /// Delete a binary; its parts and segments cascade
    ///
    /// Returns whether a row was removed.
    pub async fn delete_binary(&self, id: BinaryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM binaries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to delete binary", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of binaries currently stored
    pub async fn count_binaries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM binaries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_error("Failed to count binaries", e))?;

        Ok(count)
    }
}
