//! # Tidemark
//!
//! Schema reconciliation and reversible, group-based migrations for
//! relational databases.
//!
//! Tidemark provides:
//! - Declarative table models, in code or TOML
//! - A migration ledger with groups, rollback and a persisted lock
//! - Schema inspection and a differ that detects table and column renames
//! - DDL rendering for PostgreSQL and SQLite
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidemark::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let models = ModelSet::new().model(
//!         ModelSpec::new("users")
//!             .column(ColumnSpec::new("id", "bigint").primary_key().identity())
//!             .column(ColumnSpec::new("email", "varchar").length(200).unique()),
//!     );
//!
//!     let db = SqliteDatabase::from_url("sqlite://./app.db").await?;
//!     let auto = AutoMigrator::new(Arc::new(db), models, AutoMigrateConfig::default())?;
//!
//!     let group = auto.migrate().await?;
//!     println!("{}", group);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Models and schema state.
pub mod schema {
    pub use tidemark_schema::*;
}

/// Ledger, runner, differ and auto-migrator.
pub mod migrate {
    pub use tidemark_migrate::*;
}

/// SQLite backend.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use tidemark_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        AutoMigrateConfig, AutoMigrator, Database, MigrateResult, Migration, MigrationError,
        MigrationGroup, Migrations, Migrator, MigratorConfig, RenamePolicy,
    };
    pub use crate::schema::{
        BuildSchema, ColumnSpec, ForeignKeySpec, ModelSet, ModelSpec, SchemaState, UniqueSpec,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::{SqliteConfig, SqliteDatabase};
}

// Re-export key types at the crate root
pub use migrate::{AutoMigrator, MigrationError, Migrator};
pub use schema::{ModelSet, SchemaState};
