//! The SQLite database handle.

use std::sync::Arc;

use tidemark_migrate::{
    Database, Dialect, Executor, Inspects, LedgerStore, LedgerTables, MigrateResult,
};
use tokio_rusqlite::Connection;
use tracing::{debug, trace};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};
use crate::ledger::SqliteLedger;
use crate::render::SqliteDialect;

/// A SQLite database that can be migrated and inspected.
///
/// All work runs on a single `tokio-rusqlite` connection, so an in-memory
/// database keeps its contents for the lifetime of the handle.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Connection,
    config: SqliteConfig,
    dialect: SqliteDialect,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("config", &self.config)
            .finish()
    }
}

impl SqliteDatabase {
    /// Open a database with the given configuration.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => Connection::open(path).await?,
        };

        let init_sql = config.init_sql();
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        debug!(memory = config.path.is_memory(), "Opened SQLite database");
        Ok(Self {
            conn,
            config,
            dialect: SqliteDialect::new(),
        })
    }

    /// Open a fresh in-memory database.
    pub async fn open_in_memory() -> SqliteResult<Self> {
        Self::open(SqliteConfig::memory()).await
    }

    /// Open a database from a URL such as `sqlite://app.db`.
    pub async fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        Self::open(SqliteConfig::from_url(url)?).await
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The configuration the database was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Wrap the handle for use with the migrator.
    pub fn into_shared(self) -> Arc<dyn Database> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl Executor for SqliteDatabase {
    async fn execute(&self, sql: &str) -> MigrateResult<()> {
        let sql = sql.to_string();
        trace!(sql = %sql, "Executing statement");

        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }

    async fn execute_in_transaction(&self, statements: &[String]) -> MigrateResult<()> {
        let statements = statements.to_vec();
        debug!(count = statements.len(), "Executing statements in a transaction");

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for sql in &statements {
                    tx.execute_batch(sql)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }
}

impl Database for SqliteDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn executor(&self) -> &dyn Executor {
        self
    }

    fn ledger(&self, tables: &LedgerTables) -> Arc<dyn LedgerStore> {
        Arc::new(SqliteLedger::new(self.conn.clone(), tables.clone()))
    }

    fn inspector(&self) -> Option<&dyn Inspects> {
        Some(self)
    }
}
