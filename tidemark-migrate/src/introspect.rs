//! Database introspection.
//!
//! The [`Inspector`] reads the live schema through the database's
//! [`Inspects`] capability and hides the tables that must never take part in
//! a schema comparison: the migration ledger, its lock table and any table
//! the caller excludes.

use std::sync::Arc;

use tidemark_schema::SchemaState;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{MigrateResult, MigrationError};
use crate::history::LedgerTables;

/// Reads the current schema of a database.
#[async_trait::async_trait]
pub trait Inspects: Send + Sync {
    /// Inspect every table, column, constraint and foreign key.
    async fn inspect_schema(&self) -> MigrateResult<SchemaState>;
}

/// Schema inspector with exclusion rules.
pub struct Inspector {
    db: Arc<dyn Database>,
    ledger: LedgerTables,
    exclude: Vec<String>,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("dialect", &self.db.dialect().name())
            .field("ledger", &self.ledger)
            .field("exclude", &self.exclude)
            .finish()
    }
}

impl Inspector {
    /// Create an inspector, failing `InspectionUnsupported` when the database
    /// cannot be inspected.
    pub fn new(db: Arc<dyn Database>, exclude: Vec<String>) -> MigrateResult<Self> {
        if db.inspector().is_none() {
            return Err(MigrationError::InspectionUnsupported {
                dialect: db.dialect().name().to_string(),
            });
        }

        Ok(Self {
            db,
            ledger: LedgerTables::default(),
            exclude,
        })
    }

    /// Use non-default ledger table names.
    pub fn with_ledger_tables(mut self, ledger: LedgerTables) -> Self {
        self.ledger = ledger;
        self
    }

    /// Names of all tables this inspector hides.
    pub fn excluded_tables(&self) -> Vec<String> {
        let mut excluded = vec![
            self.ledger.table_name.clone(),
            self.ledger.locks_table_name.clone(),
        ];
        excluded.extend(self.exclude.iter().cloned());
        excluded
    }

    /// Inspect the database.
    #[instrument(skip(self), fields(dialect = %self.db.dialect().name()))]
    pub async fn inspect(&self) -> MigrateResult<SchemaState> {
        let inspects = self
            .db
            .inspector()
            .ok_or_else(|| MigrationError::InspectionUnsupported {
                dialect: self.db.dialect().name().to_string(),
            })?;

        let state = inspects
            .inspect_schema()
            .await?
            .without_tables(&self.excluded_tables());

        debug!(
            tables = state.tables.len(),
            foreign_keys = state.foreign_keys.len(),
            "Inspected schema"
        );
        Ok(state)
    }
}
