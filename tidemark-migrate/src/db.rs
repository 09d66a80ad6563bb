//! Capabilities a database must provide to be migrated.
//!
//! A [`Database`] bundles three collaborators: an [`Executor`] that runs SQL
//! statements, a [`Dialect`] that knows the DDL syntax and type rules, and a
//! [`LedgerStore`] that persists migration records and the lock row. Schema
//! inspection is optional and exposed through [`Database::inspector`].

use std::sync::Arc;

use crate::error::MigrateResult;
use crate::history::{LedgerStore, LedgerTables};
use crate::introspect::Inspects;
use crate::sql::Renders;

/// Runs SQL statements.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Execute a single statement (or batch the driver accepts as one).
    async fn execute(&self, sql: &str) -> MigrateResult<()>;

    /// Whether DDL statements can run inside a transaction.
    fn supports_transactional_ddl(&self) -> bool {
        false
    }

    /// Execute statements atomically when supported, sequentially otherwise.
    async fn execute_in_transaction(&self, statements: &[String]) -> MigrateResult<()> {
        for statement in statements {
            self.execute(statement).await?;
        }
        Ok(())
    }
}

/// SQL dialect rules.
pub trait Dialect: Send + Sync {
    /// Dialect name, used in error messages.
    fn name(&self) -> &str;

    /// DDL renderer for this dialect.
    fn renderer(&self) -> &dyn Renders;

    /// Namespace for tables declared without one.
    fn default_schema(&self) -> &str;

    /// Canonical spelling of a type name, used to compare types.
    fn canonical_type(&self, sql_type: &str) -> String {
        sql_type.trim().to_ascii_lowercase()
    }

    /// Whether two type names denote the same type.
    fn types_equivalent(&self, a: &str, b: &str) -> bool {
        self.canonical_type(a) == self.canonical_type(b)
    }
}

/// A database that can be migrated.
pub trait Database: Send + Sync {
    /// The SQL dialect.
    fn dialect(&self) -> &dyn Dialect;

    /// The statement executor.
    fn executor(&self) -> &dyn Executor;

    /// Ledger store bound to the given table names.
    fn ledger(&self, tables: &LedgerTables) -> Arc<dyn LedgerStore>;

    /// Schema inspection capability, if the dialect has one.
    fn inspector(&self) -> Option<&dyn Inspects> {
        None
    }
}
