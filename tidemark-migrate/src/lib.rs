//! # tidemark-migrate
//!
//! Migration engine for tidemark.
//!
//! This crate provides:
//! - A migration ledger and runner with group-based rollback and a persisted
//!   cross-process lock ([`Migrator`])
//! - Schema inspection through database capabilities ([`Inspector`])
//! - A schema differ that detects renamed tables, columns and foreign keys and
//!   orders operations by dependency ([`Differ`])
//! - DDL rendering ([`Renders`], with a PostgreSQL renderer)
//! - Automatic migrations from model declarations ([`AutoMigrator`])
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Model Set    │────▶│ Differ         │────▶│ Renderer    │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!                              ▲                     │
//!                              │                     ▼
//!                      ┌────────────────┐     ┌─────────────┐
//!                      │ Inspector      │     │ .up/.down   │
//!                      └────────────────┘     └─────────────┘
//!                                                    │
//!                                                    ▼
//!                                            ┌─────────────┐
//!                                            │ Migrator    │──▶ ledger + lock
//!                                            └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidemark_migrate::{Migration, Migrations, Migrator, MigratorConfig};
//!
//! let migrations = Migrations::new()
//!     .with(Migration::sql(
//!         "20240101000000_create_users",
//!         vec!["CREATE TABLE users (id BIGINT PRIMARY KEY);".into()],
//!         vec!["DROP TABLE users;".into()],
//!     ))?;
//!
//! let migrator = Migrator::new(db, migrations, MigratorConfig::default())?;
//! let group = migrator.migrate().await?;
//! println!("{}", group);
//! ```
//!
//! ## Migration Files
//!
//! Generated migrations are stored as file pairs. Statements are separated by
//! a `--tidemark:split` line:
//!
//! ```text
//! migrations/
//! ├── 20240101000000_auto.up.sql
//! └── 20240101000000_auto.down.sql
//! ```

pub mod auto;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod file;
pub mod history;
pub mod introspect;
pub mod migration;
pub mod order;
pub mod runner;
pub mod sql;

pub use auto::{AutoMigrator, GeneratedMigration, MigrationPlan, next_migration_name};
pub use config::{AutoMigrateConfig, ForeignKeyNamer, MigratorConfig, RenameHints, RenamePolicy};
pub use db::{Database, Dialect, Executor};
pub use diff::{DiffOperation, DiffOptions, Differ, SchemaDiff};
pub use error::{MigrateResult, MigrationError};
pub use file::{MigrationFile, MigrationFileManager, STATEMENT_SPLIT};
pub use history::{
    DEFAULT_LEDGER_TABLE, DEFAULT_LOCKS_TABLE, LedgerStore, LedgerTables, MigrationLock,
    MigrationRecord,
};
pub use introspect::{Inspector, Inspects};
pub use migration::{FnAction, Migration, MigrationAction, MigrationGroup, Migrations, SqlAction};
pub use runner::{MigrationStatus, Migrator};
pub use sql::{MigrationSql, PostgresDialect, PostgresRenderer, Renders};
