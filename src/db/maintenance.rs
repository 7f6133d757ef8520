//! Dead binary eviction and compaction.

use crate::Result;
use crate::types::to_micros;
use chrono::{DateTime, Utc};

use super::{Database, query_error};

impl Database {
    /// Delete binaries posted strictly before `cutoff`
    ///
    /// A binary posted exactly at the cutoff survives. Parts and segments go
    /// with their binary. Returns the number of binaries removed.
    pub async fn evict_binaries_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM binaries WHERE posted < ?")
            .bind(to_micros(cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to evict dead binaries", e))?;

        Ok(result.rows_affected())
    }

    /// Reclaim free pages across the whole database file
    ///
    /// `VACUUM` cannot run inside a transaction, so it is issued on its own
    /// pooled connection.
    pub async fn compact(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| query_error("Failed to acquire connection for compaction", e))?;

        sqlx::query("VACUUM")
            .execute(&mut *conn)
            .await
            .map_err(|e| query_error("Failed to vacuum database", e))?;

        Ok(())
    }
}
