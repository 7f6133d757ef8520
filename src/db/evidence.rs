//! Secondary evidence attached to releases: file listings, NFO and SFV blobs.
//!
//! The protocol layer fills these in after publication; the name resolver
//! reads them back when correcting badly named releases.

use crate::Result;
use crate::types::ReleaseId;

use super::{Database, query_error};

/// A file listed inside a release
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReleaseFile {
    /// File name as listed in the archive or posting
    pub name: String,
    /// Size in bytes
    pub size: i64,
}

impl Database {
    /// Record a file belonging to a release
    pub async fn add_release_file(&self, release_id: ReleaseId, name: &str, size: i64) -> Result<()> {
        sqlx::query("INSERT INTO release_files (release_id, name, size) VALUES (?, ?, ?)")
            .bind(release_id)
            .bind(name)
            .bind(size)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to insert release file", e))?;

        Ok(())
    }

    /// Files of a release in insertion order
    pub async fn release_files(&self, release_id: ReleaseId) -> Result<Vec<ReleaseFile>> {
        let rows = sqlx::query_as::<_, ReleaseFile>(
            "SELECT name, size FROM release_files WHERE release_id = ? ORDER BY id",
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list release files", e))?;

        Ok(rows)
    }

    /// Store an NFO blob and link it to the release
    pub async fn attach_nfo(&self, release_id: ReleaseId, data: &[u8]) -> Result<i64> {
        self.attach_blob(release_id, data, "nfos", "nfo_id").await
    }

    /// Store an SFV blob and link it to the release
    pub async fn attach_sfv(&self, release_id: ReleaseId, data: &[u8]) -> Result<i64> {
        self.attach_blob(release_id, data, "sfvs", "sfv_id").await
    }

    /// NFO blob linked to the release, if any
    pub async fn get_nfo(&self, release_id: ReleaseId) -> Result<Option<Vec<u8>>> {
        self.linked_blob(release_id, "nfos", "nfo_id").await
    }

    /// SFV blob linked to the release, if any
    pub async fn get_sfv(&self, release_id: ReleaseId) -> Result<Option<Vec<u8>>> {
        self.linked_blob(release_id, "sfvs", "sfv_id").await
    }

    // table and column are crate constants, never user input
    async fn attach_blob(
        &self,
        release_id: ReleaseId,
        data: &[u8],
        table: &str,
        column: &str,
    ) -> Result<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin transaction", e))?;

        let blob_id = sqlx::query(&format!("INSERT INTO {} (data) VALUES (?)", table))
            .bind(data)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to insert blob", e))?
            .last_insert_rowid();

        sqlx::query(&format!("UPDATE releases SET {} = ? WHERE id = ?", column))
            .bind(blob_id)
            .bind(release_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to link blob", e))?;

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit blob", e))?;

        Ok(blob_id)
    }

    async fn linked_blob(
        &self,
        release_id: ReleaseId,
        table: &str,
        column: &str,
    ) -> Result<Option<Vec<u8>>> {
        let data: Option<Vec<u8>> = sqlx::query_scalar(&format!(
            "SELECT {t}.data FROM {t} INNER JOIN releases ON releases.{c} = {t}.id WHERE releases.id = ?",
            t = table,
            c = column
        ))
        .bind(release_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get blob", e))?;

        Ok(data)
    }
}
