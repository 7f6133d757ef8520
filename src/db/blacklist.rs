//! Blacklist rule storage.

use crate::Result;

use super::{BlacklistRow, Database, NewBlacklistRule, query_error};

impl Database {
    /// Enabled blacklist rules, ordered by id
    pub async fn enabled_blacklist_rules(&self) -> Result<Vec<BlacklistRow>> {
        let rows = sqlx::query_as::<_, BlacklistRow>(
            r#"
            SELECT id, group_name, field, regex, status, description
            FROM blacklists
            WHERE status = 1
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to load blacklist rules", e))?;

        Ok(rows)
    }

    /// Insert a blacklist rule
    pub async fn insert_blacklist_rule(&self, rule: &NewBlacklistRule) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO blacklists (group_name, field, regex, status, description)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.group_name)
        .bind(&rule.field)
        .bind(&rule.regex)
        .bind(rule.status)
        .bind(&rule.description)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert blacklist rule", e))?;

        Ok(result.last_insert_rowid())
    }
}
