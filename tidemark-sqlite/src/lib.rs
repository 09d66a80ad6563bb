//! SQLite backend for tidemark.
//!
//! This crate lets the migration runner and the auto-migrator drive a SQLite
//! database through `tokio-rusqlite`.
//!
//! # Features
//!
//! - Statement execution, with transactional DDL
//! - Migration ledger and lock tables
//! - Schema inspection via the `pragma_*` table functions
//! - DDL rendering within the limits of SQLite's `ALTER TABLE`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tidemark_migrate::{AutoMigrateConfig, AutoMigrator};
//! use tidemark_sqlite::{SqliteConfig, SqliteDatabase};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = SqliteDatabase::open(SqliteConfig::from_url("sqlite://./app.db")?).await?;
//!     let migrator = AutoMigrator::new(Arc::new(db), models, AutoMigrateConfig::default())?;
//!     migrator.migrate().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod inspect;
pub mod ledger;
pub mod render;

pub use config::{DatabasePath, JournalMode, SqliteConfig};
pub use database::SqliteDatabase;
pub use error::{SqliteError, SqliteResult};
pub use ledger::SqliteLedger;
pub use render::{SqliteDialect, SqliteRenderer, type_affinity};
