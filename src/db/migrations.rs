//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

/// Seed rows for the category tree: (id, parent_id, name)
const CATEGORY_SEED: &[(i64, Option<i64>, &str)] = &[
    (1000, None, "Console"),
    (1010, Some(1000), "NDS"),
    (1030, Some(1000), "Wii"),
    (1040, Some(1000), "Xbox"),
    (1050, Some(1000), "Xbox 360"),
    (1080, Some(1000), "PS3"),
    (2000, None, "Movies"),
    (2010, Some(2000), "Foreign"),
    (2020, Some(2000), "Other"),
    (2030, Some(2000), "SD"),
    (2040, Some(2000), "HD"),
    (2060, Some(2000), "BluRay"),
    (3000, None, "Audio"),
    (3010, Some(3000), "MP3"),
    (3020, Some(3000), "Video"),
    (3030, Some(3000), "Audiobook"),
    (3040, Some(3000), "Lossless"),
    (4000, None, "PC"),
    (4010, Some(4000), "0day"),
    (4020, Some(4000), "ISO"),
    (4030, Some(4000), "Mac"),
    (4050, Some(4000), "Games"),
    (5000, None, "TV"),
    (5020, Some(5000), "Foreign"),
    (5030, Some(5000), "SD"),
    (5040, Some(5000), "HD"),
    (5050, Some(5000), "Other"),
    (5060, Some(5000), "Sport"),
    (5070, Some(5000), "Anime"),
    (5080, Some(5000), "Documentary"),
    (6000, None, "XXX"),
    (6010, Some(6000), "DVD"),
    (6020, Some(6000), "WMV"),
    (6030, Some(6000), "XviD"),
    (6040, Some(6000), "x264"),
    (7000, None, "Books"),
    (7010, Some(7000), "Mags"),
    (7020, Some(7000), "Ebook"),
    (7030, Some(7000), "Comics"),
    (8000, None, "Misc"),
    (8010, Some(8000), "Other"),
];

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::apply_migration(&mut conn, 1).await?;
        }
        if current_version < 2 {
            Self::apply_migration(&mut conn, 2).await?;
        }

        Ok(())
    }

    /// Run one migration inside `BEGIN`/`COMMIT`, rolling back on failure
    async fn apply_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        tracing::info!(version, "Applying database migration");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        exec(conn, "BEGIN", "begin transaction").await?;

        let result = async {
            match version {
                1 => Self::migrate_v1(conn).await?,
                2 => Self::migrate_v2(conn).await?,
                other => {
                    return Err(Error::Database(DatabaseError::MigrationFailed(format!(
                        "Unknown migration version {}",
                        other
                    ))));
                }
            }
            Self::record_migration(conn, version).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => exec(conn, "COMMIT", "commit migration").await?,
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Migration v1: groups, binaries, parts, segments, misses, categories,
    /// blacklists, NZBs and releases
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            r#"
            CREATE TABLE groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                active INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "create groups table",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE binaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                group_name TEXT NOT NULL,
                posted_by TEXT NOT NULL,
                posted INTEGER NOT NULL,
                total_parts INTEGER NOT NULL,
                regex_id INTEGER,
                xref TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            "create binaries table",
        )
        .await?;
        exec(
            conn,
            "CREATE INDEX idx_binaries_posted ON binaries(posted)",
            "create index",
        )
        .await?;
        exec(
            conn,
            "CREATE INDEX idx_binaries_name_posted ON binaries(name, posted)",
            "create index",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE parts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                binary_id INTEGER NOT NULL REFERENCES binaries(id) ON DELETE CASCADE,
                message_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                total_segments INTEGER NOT NULL,
                posted INTEGER NOT NULL
            )
            "#,
            "create parts table",
        )
        .await?;
        exec(
            conn,
            "CREATE INDEX idx_parts_binary ON parts(binary_id)",
            "create index",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                part_id INTEGER NOT NULL REFERENCES parts(id) ON DELETE CASCADE,
                segment INTEGER NOT NULL,
                size INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                UNIQUE(part_id, segment)
            )
            "#,
            "create segments table",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE misses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_name TEXT NOT NULL,
                article INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                UNIQUE(group_name, article)
            )
            "#,
            "create misses table",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE categories (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER REFERENCES categories(id),
                name TEXT NOT NULL
            )
            "#,
            "create categories table",
        )
        .await?;

        for (id, parent_id, name) in CATEGORY_SEED {
            sqlx::query("INSERT INTO categories (id, parent_id, name) VALUES (?, ?, ?)")
                .bind(id)
                .bind(parent_id)
                .bind(name)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to seed category {}: {}",
                        id, e
                    )))
                })?;
        }

        exec(
            conn,
            r#"
            CREATE TABLE blacklists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_name TEXT NOT NULL,
                field TEXT NOT NULL DEFAULT 'subject',
                regex TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 1,
                description TEXT
            )
            "#,
            "create blacklists table",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE nzbs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data BLOB NOT NULL,
                sha256 TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "create nzbs table",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                search_name TEXT NOT NULL,
                posted INTEGER NOT NULL,
                posted_by TEXT NOT NULL,
                category_id INTEGER NOT NULL REFERENCES categories(id),
                group_id INTEGER NOT NULL REFERENCES groups(id),
                regex_id INTEGER,
                size INTEGER NOT NULL DEFAULT 0,
                grabs INTEGER NOT NULL DEFAULT 0,
                nzb_id INTEGER REFERENCES nzbs(id) ON DELETE SET NULL,
                added INTEGER NOT NULL,
                UNIQUE(name, posted)
            )
            "#,
            "create releases table",
        )
        .await?;
        exec(
            conn,
            "CREATE INDEX idx_releases_category ON releases(category_id)",
            "create index",
        )
        .await?;

        Ok(())
    }

    /// Migration v2: post-processing state and rename evidence
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        exec(
            conn,
            "ALTER TABLE releases ADD COLUMN passworded TEXT NOT NULL DEFAULT 'unknown'",
            "add passworded column",
        )
        .await?;
        exec(
            conn,
            "ALTER TABLE releases ADD COLUMN unwanted INTEGER NOT NULL DEFAULT 0",
            "add unwanted column",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE nfos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data BLOB NOT NULL
            )
            "#,
            "create nfos table",
        )
        .await?;
        exec(
            conn,
            r#"
            CREATE TABLE sfvs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                data BLOB NOT NULL
            )
            "#,
            "create sfvs table",
        )
        .await?;

        exec(
            conn,
            "ALTER TABLE releases ADD COLUMN nfo_id INTEGER REFERENCES nfos(id) ON DELETE SET NULL",
            "add nfo_id column",
        )
        .await?;
        exec(
            conn,
            "ALTER TABLE releases ADD COLUMN sfv_id INTEGER REFERENCES sfvs(id) ON DELETE SET NULL",
            "add sfv_id column",
        )
        .await?;

        exec(
            conn,
            r#"
            CREATE TABLE release_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "create release_files table",
        )
        .await?;
        exec(
            conn,
            "CREATE INDEX idx_release_files_release ON release_files(release_id)",
            "create index",
        )
        .await?;

        Ok(())
    }

    /// Record that a migration version was applied
    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Execute one schema statement, reporting failures as migration errors
async fn exec(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
    sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
        Error::Database(DatabaseError::MigrationFailed(format!(
            "Failed to {}: {}",
            what, e
        )))
    })?;
    Ok(())
}
