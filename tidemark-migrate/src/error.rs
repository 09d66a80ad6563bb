//! Error types for the migration engine.

use thiserror::Error;

use crate::migration::MigrationGroup;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Another process holds the migration lock.
    #[error("migration lock on `{table}` is held by another process")]
    LockHeld {
        /// Ledger table the lock guards.
        table: String,
    },

    /// The database exposes no schema inspection capability.
    #[error("schema inspection is not supported by the `{dialect}` dialect")]
    InspectionUnsupported {
        /// Dialect name.
        dialect: String,
    },

    /// The target schema is structurally invalid.
    #[error("schema mismatch: {source}")]
    SchemaMismatch {
        /// The validation failure.
        #[from]
        source: tidemark_schema::SchemaError,
    },

    /// A migration step failed; `group` lists what was completed before it.
    #[error("migration `{name}` failed after {} completed in group {}: {source}", group.migrations.len(), group.id)]
    MigrationFailed {
        /// Name of the failing migration.
        name: String,
        /// Migrations applied (or rolled back) before the failure.
        group: MigrationGroup,
        /// The original failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// Auto-migration was requested without any models.
    #[error("no models registered")]
    NoModelsRegistered,

    /// More than one equally good rename candidate exists.
    #[error("ambiguous {kind} rename for `{subject}`: candidates {}", candidates.join(", "))]
    AmbiguousRename {
        /// "table" or "column".
        kind: String,
        /// The table or column being matched.
        subject: String,
        /// Equally scored candidates.
        candidates: Vec<String>,
    },

    /// No changes to migrate.
    #[error("no schema changes detected")]
    NoChanges,

    /// Migration not found.
    #[error("migration `{0}` not found")]
    NotFound(String),

    /// Two migrations share a name.
    #[error("migration `{0}` is registered twice")]
    DuplicateMigration(String),

    /// The dialect cannot express an operation.
    #[error("`{dialect}` does not support {operation}")]
    Unsupported {
        /// Dialect name.
        dialect: String,
        /// Description of the operation.
        operation: String,
    },

    /// Database operation error.
    #[error("database error: {0}")]
    Database(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid migration file or format.
    #[error("invalid migration: {0}")]
    InvalidMigration(String),

    /// General migration error.
    #[error("{0}")]
    Other(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(dialect: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect: dialect.into(),
            operation: operation.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a migration file error.
    pub fn migration_file(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether callers should treat this as "skip" rather than failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::InspectionUnsupported { .. })
    }

    /// The group completed before a step failed, if this is a step failure.
    pub fn failed_group(&self) -> Option<&MigrationGroup> {
        match self {
            Self::MigrationFailed { group, .. } => Some(group),
            _ => None,
        }
    }

    /// Message of the innermost error in the source chain.
    pub fn root_message(&self) -> String {
        let mut current: &dyn std::error::Error = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}
