//! Category lookups.

use crate::Result;

use super::{Category, Database, query_error};

impl Database {
    /// Get a category by ID
    pub async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let row =
            sqlx::query_as::<_, Category>("SELECT id, parent_id, name FROM categories WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_error("Failed to get category", e))?;

        Ok(row)
    }

    /// All categories, ordered by id
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows =
            sqlx::query_as::<_, Category>("SELECT id, parent_id, name FROM categories ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_error("Failed to list categories", e))?;

        Ok(rows)
    }
}
