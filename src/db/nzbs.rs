//! NZB descriptor storage.

use crate::Result;
use crate::types::{NzbId, to_micros};

use super::{Database, query_error};

/// Stored NZB descriptor
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredNzb {
    /// Unique database ID
    pub id: NzbId,
    /// NZB XML bytes
    pub data: Vec<u8>,
    /// Hex SHA-256 of `data`
    pub sha256: String,
    /// Insertion time (unix microseconds)
    pub created_at: i64,
}

impl Database {
    /// Store an NZB document
    pub async fn insert_nzb(&self, data: &[u8], sha256: &str) -> Result<NzbId> {
        let result =
            sqlx::query("INSERT INTO nzbs (data, sha256, created_at) VALUES (?, ?, ?)")
                .bind(data)
                .bind(sha256)
                .bind(to_micros(chrono::Utc::now()))
                .execute(&self.pool)
                .await
                .map_err(|e| query_error("Failed to insert NZB", e))?;

        Ok(NzbId(result.last_insert_rowid()))
    }

    /// Get an NZB document by ID
    pub async fn get_nzb(&self, id: NzbId) -> Result<Option<StoredNzb>> {
        let row = sqlx::query_as::<_, StoredNzb>(
            "SELECT id, data, sha256, created_at FROM nzbs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get NZB", e))?;

        Ok(row)
    }

    /// Delete an NZB document that no release links to
    pub async fn delete_nzb(&self, id: NzbId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nzbs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to delete NZB", e))?;

        Ok(result.rows_affected() > 0)
    }
}
