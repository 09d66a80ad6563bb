//! Error types for schema state construction and validation.

// These warnings are false positives - the fields are used by derive macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building or validating a schema state.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(tidemark::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML")]
    #[diagnostic(code(tidemark::schema::toml_error))]
    TomlError {
        #[source]
        source: toml::de::Error,
    },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(tidemark::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// Invalid table definition.
    #[error("invalid table `{table}`: {message}")]
    #[diagnostic(code(tidemark::schema::invalid_table))]
    InvalidTable { table: String, message: String },

    /// Invalid column definition.
    #[error("invalid column `{table}.{column}`: {message}")]
    #[diagnostic(code(tidemark::schema::invalid_column))]
    InvalidColumn {
        table: String,
        column: String,
        message: String,
    },

    /// Column-level and table-level primary key declarations disagree.
    #[error("table `{table}` declares conflicting primary keys ({declared}) and ({flagged})")]
    #[diagnostic(
        code(tidemark::schema::conflicting_primary_key),
        help("declare the primary key either on the columns or on the table, not both")
    )]
    ConflictingPrimaryKey {
        table: String,
        declared: String,
        flagged: String,
    },

    /// Invalid foreign key definition.
    #[error("invalid foreign key on `{table}`: {message}")]
    #[diagnostic(code(tidemark::schema::invalid_foreign_key))]
    InvalidForeignKey { table: String, message: String },
}

impl SchemaError {
    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid table error.
    pub fn invalid_table(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an invalid column error.
    pub fn invalid_column(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidColumn {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create an invalid foreign key error.
    pub fn invalid_foreign_key(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidForeignKey {
            table: table.into(),
            message: message.into(),
        }
    }
}
