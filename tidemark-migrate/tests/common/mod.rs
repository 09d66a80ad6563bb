//! In-memory database used by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tidemark_migrate::{
    Database, Dialect, Executor, Inspects, LedgerStore, LedgerTables, MigrateResult,
    MigrationError, MigrationRecord, PostgresDialect,
};
use tidemark_schema::SchemaState;

/// Records executed statements and fails on a configured pattern.
#[derive(Default)]
pub struct FakeExecutor {
    executed: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

#[async_trait::async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, sql: &str) -> MigrateResult<()> {
        if let Some(pattern) = self.fail_on.lock().as_deref() {
            if sql.contains(pattern) {
                return Err(MigrationError::database(format!("failed: {}", sql)));
            }
        }
        self.executed.lock().push(sql.to_string());
        Ok(())
    }
}

/// Ledger rows and the lock flag.
pub struct FakeLedger {
    tables: LedgerTables,
    records: Mutex<Vec<MigrationRecord>>,
    locked: Mutex<bool>,
    recreated: Mutex<usize>,
}

#[async_trait::async_trait]
impl LedgerStore for FakeLedger {
    fn tables(&self) -> &LedgerTables {
        &self.tables
    }

    async fn init(&self) -> MigrateResult<()> {
        Ok(())
    }

    async fn recreate(&self) -> MigrateResult<()> {
        self.records.lock().clear();
        *self.recreated.lock() += 1;
        Ok(())
    }

    async fn try_lock(&self) -> MigrateResult<bool> {
        let mut locked = self.locked.lock();
        if *locked {
            return Ok(false);
        }
        *locked = true;
        Ok(true)
    }

    async fn unlock(&self) -> MigrateResult<()> {
        *self.locked.lock() = false;
        Ok(())
    }

    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
        let mut records = self.records.lock().clone();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn insert(&self, record: &MigrationRecord) -> MigrateResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> MigrateResult<()> {
        self.records.lock().retain(|r| r.name != name);
        Ok(())
    }
}

/// Returns a configurable schema.
#[derive(Default)]
pub struct FakeInspector {
    schema: Mutex<SchemaState>,
}

#[async_trait::async_trait]
impl Inspects for FakeInspector {
    async fn inspect_schema(&self) -> MigrateResult<SchemaState> {
        Ok(self.schema.lock().clone())
    }
}

/// A PostgreSQL-flavored database kept in memory.
pub struct FakeDatabase {
    dialect: PostgresDialect,
    executor: FakeExecutor,
    ledger: Arc<FakeLedger>,
    inspector: Option<FakeInspector>,
}

impl FakeDatabase {
    /// A database without inspection support.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// A database whose inspector reports `schema`.
    pub fn with_schema(schema: SchemaState) -> Arc<Self> {
        Arc::new(Self::build(Some(FakeInspector {
            schema: Mutex::new(schema),
        })))
    }

    fn build(inspector: Option<FakeInspector>) -> Self {
        Self {
            dialect: PostgresDialect::new(),
            executor: FakeExecutor::default(),
            ledger: Arc::new(FakeLedger {
                tables: LedgerTables::default(),
                records: Mutex::new(Vec::new()),
                locked: Mutex::new(false),
                recreated: Mutex::new(0),
            }),
            inspector,
        }
    }

    /// Statements executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.executor.executed.lock().clone()
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str) {
        *self.executor.fail_on.lock() = Some(pattern.to_string());
    }

    /// Recorded migrations in insertion order.
    pub fn records(&self) -> Vec<MigrationRecord> {
        self.ledger.records.lock().clone()
    }

    /// Insert a ledger row directly.
    pub fn record(&self, name: &str, group_id: i64) {
        self.ledger
            .records
            .lock()
            .push(MigrationRecord::new(name, group_id));
    }

    /// Whether the lock row exists.
    pub fn is_locked(&self) -> bool {
        *self.ledger.locked.lock()
    }

    /// Take the lock as if another process held it.
    pub fn hold_lock(&self) {
        *self.ledger.locked.lock() = true;
    }

    /// How often the ledger table was recreated.
    pub fn recreated(&self) -> usize {
        *self.ledger.recreated.lock()
    }

    /// Replace the schema the inspector reports.
    pub fn set_schema(&self, schema: SchemaState) {
        if let Some(inspector) = &self.inspector {
            *inspector.schema.lock() = schema;
        }
    }
}

impl Database for FakeDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn executor(&self) -> &dyn Executor {
        &self.executor
    }

    fn ledger(&self, _tables: &LedgerTables) -> Arc<dyn LedgerStore> {
        self.ledger.clone()
    }

    fn inspector(&self) -> Option<&dyn Inspects> {
        self.inspector.as_ref().map(|i| i as &dyn Inspects)
    }
}

/// Install a test subscriber once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tidemark_migrate=debug")
        .with_test_writer()
        .try_init();
}
