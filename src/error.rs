//! Error types for usenet-indexer
//!
//! Decision outcomes of the finalization pipeline (duplicate, blacklisted,
//! undersized, ...) are *not* errors and never appear here; they are reported
//! through [`crate::pipeline::FinalizeOutcome`]. This module covers the
//! failures that can actually interrupt a unit of work:
//! - configuration problems detected before the scan loop starts
//! - store failures (connection, migration, query)
//! - failures reported by the external collaborators (scanner, NZB writer)

use thiserror::Error;

/// Result type alias for usenet-indexer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usenet-indexer
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "scan.update_threads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The protocol layer failed while scanning a group
    #[error("scan of {group} failed: {reason}")]
    Scan {
        /// Group that was being scanned
        group: String,
        /// Failure reported by the scanner
        reason: String,
    },

    /// Building or storing an NZB descriptor failed
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration could not be parsed
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Shorthand for a scan failure of one group
    pub fn scan(group: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Scan {
            group: group.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from a uniqueness constraint in the store
    ///
    /// The pipeline uses this to treat a lost insert race on the
    /// `(name, posted)` release key as a duplicate rather than a failure.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(DatabaseError::ConstraintViolation(_)) => true,
            Error::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
