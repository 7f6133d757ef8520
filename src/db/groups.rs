//! Groups (upstream sources) and recorded article gaps.

use crate::Result;
use crate::types::GroupId;

use super::{Database, Group, query_error};

impl Database {
    /// Insert a group or update its active flag if it already exists
    pub async fn upsert_group(&self, name: &str, active: bool) -> Result<GroupId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO groups (name, active) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET active = excluded.active
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("Failed to upsert group", e))?;

        Ok(GroupId(id))
    }

    /// Enable or disable scanning of a group
    pub async fn set_group_active(&self, name: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE groups SET active = ? WHERE name = ?")
            .bind(active)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to update group", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Groups currently marked active, ordered by name
    pub async fn active_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query_as::<_, Group>(
            "SELECT id, name, active FROM groups WHERE active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list active groups", e))?;

        Ok(rows)
    }

    /// Look up a group by its exact name
    pub async fn get_group_by_name(&self, name: &str) -> Result<Option<Group>> {
        let row =
            sqlx::query_as::<_, Group>("SELECT id, name, active FROM groups WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_error("Failed to get group", e))?;

        Ok(row)
    }

    /// Record a missing article number for a group
    ///
    /// Re-recording an existing gap bumps its attempt counter.
    pub async fn record_miss(&self, group_name: &str, article: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO misses (group_name, article, attempts) VALUES (?, ?, 0)
            ON CONFLICT(group_name, article) DO UPDATE SET attempts = attempts + 1
            "#,
        )
        .bind(group_name)
        .bind(article)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to record miss", e))?;

        Ok(())
    }

    /// Remove a gap once it has been filled
    pub async fn clear_miss(&self, group_name: &str, article: i64) -> Result<()> {
        sqlx::query("DELETE FROM misses WHERE group_name = ? AND article = ?")
            .bind(group_name)
            .bind(article)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to clear miss", e))?;

        Ok(())
    }

    /// Distinct names of groups with recorded gaps
    pub async fn groups_with_misses(&self) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT group_name FROM misses GROUP BY group_name ORDER BY group_name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_error("Failed to list groups with misses", e))?;

        Ok(rows)
    }
}
