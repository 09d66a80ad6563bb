//! SQLite configuration.

use std::path::{Path, PathBuf};

use crate::error::{SqliteError, SqliteResult};

/// SQLite database configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database path (or ":memory:" for in-memory).
    pub path: DatabasePath,
    /// Enable foreign keys.
    pub foreign_keys: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u32>,
    /// Journal mode; ignored for in-memory databases.
    pub journal_mode: JournalMode,
}

/// Database path configuration.
#[derive(Debug, Clone, Default)]
pub enum DatabasePath {
    /// In-memory database.
    #[default]
    Memory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// Check if this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JournalMode {
    /// DELETE - Default mode, deletes journal after transaction.
    Delete,
    /// TRUNCATE - Truncates journal instead of deleting.
    Truncate,
    /// WAL - Write-Ahead Logging (best for concurrent access).
    #[default]
    Wal,
}

impl JournalMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Wal => "WAL",
        }
    }

    fn parse(value: &str) -> SqliteResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "truncate" => Ok(Self::Truncate),
            "wal" => Ok(Self::Wal),
            other => Err(SqliteError::config(format!("unknown journal mode `{}`", other))),
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::Memory,
            foreign_keys: true,
            busy_timeout_ms: Some(5000),
            journal_mode: JournalMode::Wal,
        }
    }
}

impl SqliteConfig {
    /// Create a new configuration for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a new configuration for a file-based database.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: DatabasePath::File(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Parse a SQLite URL into configuration.
    ///
    /// Supported formats:
    /// - `sqlite::memory:` - In-memory database
    /// - `sqlite://path/to/db.sqlite` - File-based database
    /// - `file:path/to/db.sqlite` - Alternative format
    ///
    /// Query parameters `foreign_keys`, `busy_timeout` and `journal_mode` are
    /// honored.
    pub fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        let url = url.as_ref();
        let (location, query) = match url.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (url, None),
        };

        let path = location
            .strip_prefix("sqlite://")
            .or_else(|| location.strip_prefix("sqlite:"))
            .or_else(|| location.strip_prefix("file:"))
            .unwrap_or(location);

        let mut config = match path {
            "" => return Err(SqliteError::config("database path is required")),
            ":memory:" => Self::memory(),
            path => Self::file(path),
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "mode" if value == "memory" => config.path = DatabasePath::Memory,
                "foreign_keys" => config.foreign_keys = value == "true" || value == "1",
                "busy_timeout" => {
                    let ms = value.parse().map_err(|_| {
                        SqliteError::config(format!("invalid busy_timeout `{}`", value))
                    })?;
                    config.busy_timeout_ms = Some(ms);
                }
                "journal_mode" => config.journal_mode = JournalMode::parse(value)?,
                _ => {}
            }
        }

        Ok(config)
    }

    /// Generate the initialization SQL for this configuration.
    pub fn init_sql(&self) -> String {
        let mut sql = String::new();

        if self.foreign_keys {
            sql.push_str("PRAGMA foreign_keys = ON;\n");
        }
        if !self.path.is_memory() {
            sql.push_str(&format!(
                "PRAGMA journal_mode = {};\n",
                self.journal_mode.as_pragma()
            ));
        }
        if let Some(timeout) = self.busy_timeout_ms {
            sql.push_str(&format!("PRAGMA busy_timeout = {};\n", timeout));
        }

        sql
    }

    /// Enable or disable foreign keys.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set the busy timeout in milliseconds.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = Some(ms);
        self
    }

    /// Set the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }
}
