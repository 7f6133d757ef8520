//! Release publication and post-processing updates.

use crate::error::DatabaseError;
use crate::types::{BinaryId, Passworded, ReleaseId, to_micros};
use crate::{Error, Result};

use super::{Database, NewRelease, Release, ReleaseForBlacklist, query_error};

/// Blob tables a release links to, with the linking column
const LINKED_BLOBS: [(&str, &str); 3] = [("nzbs", "nzb_id"), ("nfos", "nfo_id"), ("sfvs", "sfv_id")];

const RELEASE_COLUMNS: &str = r#"
    id, name, search_name, posted, posted_by, category_id, group_id, regex_id,
    size, grabs, nzb_id, passworded, unwanted, nfo_id, sfv_id, added
"#;

impl Database {
    /// Find a release by its de-duplication key
    pub async fn find_release(&self, name: &str, posted: i64) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE name = ? AND posted = ?",
            RELEASE_COLUMNS
        ))
        .bind(name)
        .bind(posted)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to find release", e))?;

        Ok(row)
    }

    /// Insert a release and delete the binary it was built from, atomically
    ///
    /// A concurrent insert of the same `(name, posted)` key surfaces as
    /// [`DatabaseError::ConstraintViolation`] and leaves the binary untouched.
    pub async fn publish_release(
        &self,
        release: &NewRelease,
        binary_id: BinaryId,
    ) -> Result<ReleaseId> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let now = to_micros(chrono::Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO releases (
                name, search_name, posted, posted_by, category_id, group_id,
                regex_id, size, grabs, nzb_id, added
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&release.name)
        .bind(&release.search_name)
        .bind(release.posted)
        .bind(&release.posted_by)
        .bind(release.category_id)
        .bind(release.group_id)
        .bind(release.regex_id)
        .bind(release.size)
        .bind(release.nzb_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_error("Failed to insert release", e))?;

        sqlx::query("DELETE FROM binaries WHERE id = ?")
            .bind(binary_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to delete published binary", e))?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit release: {}",
                e
            )))
        })?;

        Ok(ReleaseId(result.last_insert_rowid()))
    }

    /// Get a release by ID
    pub async fn get_release(&self, id: ReleaseId) -> Result<Option<Release>> {
        let row = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE id = ?",
            RELEASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get release", e))?;

        Ok(row)
    }

    /// Releases in one category, ordered by id
    pub async fn releases_in_category(&self, category_id: i64) -> Result<Vec<Release>> {
        let rows = sqlx::query_as::<_, Release>(&format!(
            "SELECT {} FROM releases WHERE category_id = ? ORDER BY id",
            RELEASE_COLUMNS
        ))
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list releases by category", e))?;

        Ok(rows)
    }

    /// Replace a release's search name and category
    pub async fn update_release_name(
        &self,
        id: ReleaseId,
        search_name: &str,
        category_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE releases SET search_name = ?, category_id = ? WHERE id = ?")
            .bind(search_name)
            .bind(category_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to rename release", e))?;

        Ok(())
    }

    /// Replace a release's category only
    pub async fn update_release_category(&self, id: ReleaseId, category_id: i64) -> Result<()> {
        sqlx::query("UPDATE releases SET category_id = ? WHERE id = ?")
            .bind(category_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to update release category", e))?;

        Ok(())
    }

    /// Record the outcome of archive password inspection
    pub async fn set_release_passworded(&self, id: ReleaseId, state: Passworded) -> Result<()> {
        sqlx::query("UPDATE releases SET passworded = ? WHERE id = ?")
            .bind(state.as_db())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to update passworded state", e))?;

        Ok(())
    }

    /// Flag or unflag a release as unwanted
    pub async fn set_release_unwanted(&self, id: ReleaseId, unwanted: bool) -> Result<()> {
        sqlx::query("UPDATE releases SET unwanted = ? WHERE id = ?")
            .bind(unwanted)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to update unwanted flag", e))?;

        Ok(())
    }

    /// Delete releases confirmed passworded, plus possibly-passworded ones
    /// when `include_maybe` is set. Returns the number of releases removed.
    pub async fn delete_passworded_releases(&self, include_maybe: bool) -> Result<u64> {
        let sql = if include_maybe {
            "SELECT id FROM releases WHERE passworded IN ('yes', 'maybe')"
        } else {
            "SELECT id FROM releases WHERE passworded = 'yes'"
        };

        let ids: Vec<ReleaseId> = sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to list passworded releases", e))?;

        self.delete_releases(&ids).await
    }

    /// Delete releases flagged unwanted
    pub async fn delete_unwanted_releases(&self) -> Result<u64> {
        let ids: Vec<ReleaseId> = sqlx::query_scalar("SELECT id FROM releases WHERE unwanted = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("Failed to list unwanted releases", e))?;

        self.delete_releases(&ids).await
    }

    /// Releases joined with their group name, optionally limited to those
    /// posted at or after `since` (unix microseconds)
    pub async fn releases_for_blacklist(
        &self,
        since: Option<i64>,
    ) -> Result<Vec<ReleaseForBlacklist>> {
        let rows = sqlx::query_as::<_, ReleaseForBlacklist>(
            r#"
            SELECT releases.id, releases.name, releases.posted_by, groups.name AS group_name
            FROM releases
                INNER JOIN groups ON groups.id = releases.group_id
            WHERE ? IS NULL OR releases.posted >= ?
            ORDER BY releases.id
            "#,
        )
        .bind(since)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list releases for blacklist", e))?;

        Ok(rows)
    }

    /// Delete releases by ID along with their NZB, NFO and SFV rows
    ///
    /// Everything is removed in one transaction. Returns the number of
    /// releases removed.
    pub async fn delete_releases(&self, ids: &[ReleaseId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin transaction", e))?;

        let mut deleted = 0;
        // Stay well under SQLite's bound parameter limit
        for chunk in ids.chunks(500) {
            // Blobs first, while the releases still point at them
            for (table, column) in LINKED_BLOBS {
                let mut query_builder = sqlx::QueryBuilder::new(format!(
                    "DELETE FROM {table} WHERE id IN (SELECT {column} FROM releases WHERE id IN ("
                ));
                let mut separated = query_builder.separated(", ");
                for id in chunk {
                    separated.push_bind(*id);
                }
                separated.push_unseparated("))");

                query_builder
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| query_error("Failed to delete release blobs", e))?;
            }

            let mut query_builder = sqlx::QueryBuilder::new("DELETE FROM releases WHERE id IN (");
            let mut separated = query_builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| query_error("Failed to delete releases", e))?;
            deleted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit release deletion", e))?;

        Ok(deleted)
    }

    /// Number of published releases
    pub async fn count_releases(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM releases")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_error("Failed to count releases", e))?;

        Ok(count)
    }
}
