//! Error types for SQLite operations.

use thiserror::Error;
use tidemark_migrate::MigrationError;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The catalog returned something that cannot be represented.
    #[error("Inspection error: {0}")]
    Inspect(String),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an inspection error.
    pub fn inspect(msg: impl Into<String>) -> Self {
        Self::Inspect(msg.into())
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for MigrationError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Config(msg) => MigrationError::config(msg),
            other => MigrationError::database(other.to_string()),
        }
    }
}
