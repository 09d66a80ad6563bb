//! Migration ledger and lock rows stored in SQLite tables.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tidemark_migrate::sql::quote_ident;
use tidemark_migrate::{LedgerStore, LedgerTables, MigrateResult, MigrationRecord};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::SqliteError;

/// Ledger store backed by two tables on a SQLite connection.
pub struct SqliteLedger {
    conn: Connection,
    tables: LedgerTables,
}

impl SqliteLedger {
    /// Create a ledger over `conn`.
    pub fn new(conn: Connection, tables: LedgerTables) -> Self {
        Self { conn, tables }
    }

    fn create_ledger_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
             name TEXT NOT NULL UNIQUE,\n    \
             group_id INTEGER NOT NULL,\n    \
             migrated_at TEXT NOT NULL\n);",
            quote_ident(&self.tables.table_name)
        )
    }

    fn create_locks_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
             table_name TEXT NOT NULL UNIQUE\n);",
            quote_ident(&self.tables.locks_table_name)
        )
    }

    async fn batch(&self, sql: String) -> MigrateResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    /// Whether the lock row for this ledger exists.
    pub async fn is_locked(&self) -> MigrateResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE table_name = ?1",
            quote_ident(&self.tables.locks_table_name)
        );
        let key = self.tables.table_name.clone();

        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, params![key], |_| Ok(()))
                    .optional()?)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(found.is_some())
    }
}

#[async_trait::async_trait]
impl LedgerStore for SqliteLedger {
    fn tables(&self) -> &LedgerTables {
        &self.tables
    }

    async fn init(&self) -> MigrateResult<()> {
        self.batch(format!(
            "{}\n{}",
            self.create_ledger_sql(),
            self.create_locks_sql()
        ))
        .await
    }

    async fn recreate(&self) -> MigrateResult<()> {
        debug!(table = %self.tables.table_name, "Recreating ledger table");
        self.batch(format!(
            "DROP TABLE IF EXISTS {};\n{}",
            quote_ident(&self.tables.table_name),
            self.create_ledger_sql()
        ))
        .await
    }

    async fn try_lock(&self) -> MigrateResult<bool> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (table_name) VALUES (?1)",
            quote_ident(&self.tables.locks_table_name)
        );
        let key = self.tables.table_name.clone();

        let inserted = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, params![key])?))
            .await
            .map_err(SqliteError::from)?;
        Ok(inserted == 1)
    }

    async fn unlock(&self) -> MigrateResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE table_name = ?1",
            quote_ident(&self.tables.locks_table_name)
        );
        let key = self.tables.table_name.clone();

        self.conn
            .call(move |conn| Ok(conn.execute(&sql, params![key])?))
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT name, group_id, migrated_at FROM {} ORDER BY name ASC",
            quote_ident(&self.tables.table_name)
        );

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(SqliteError::from)?;

        rows.into_iter()
            .map(|(name, group_id, migrated_at)| {
                let migrated_at = DateTime::parse_from_rfc3339(&migrated_at)
                    .map_err(|e| {
                        SqliteError::inspect(format!(
                            "invalid migrated_at `{}` for `{}`: {}",
                            migrated_at, name, e
                        ))
                    })?
                    .with_timezone(&Utc);
                Ok(MigrationRecord {
                    name,
                    group_id,
                    migrated_at,
                })
            })
            .collect()
    }

    async fn insert(&self, record: &MigrationRecord) -> MigrateResult<()> {
        let sql = format!(
            "INSERT INTO {} (name, group_id, migrated_at) VALUES (?1, ?2, ?3)",
            quote_ident(&self.tables.table_name)
        );
        let record = record.clone();

        self.conn
            .call(move |conn| {
                Ok(conn.execute(
                    &sql,
                    params![record.name, record.group_id, record.migrated_at.to_rfc3339()],
                )?)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> MigrateResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE name = ?1",
            quote_ident(&self.tables.table_name)
        );
        let name = name.to_string();

        self.conn
            .call(move |conn| Ok(conn.execute(&sql, params![name])?))
            .await
            .map_err(SqliteError::from)?;
        Ok(())
    }
}
