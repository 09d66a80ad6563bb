//! Migration history tracking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "tidemark_migrations";

/// Default name of the lock table.
pub const DEFAULT_LOCKS_TABLE: &str = "tidemark_migration_locks";

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration name.
    pub name: String,
    /// Group the migration was applied in.
    pub group_id: i64,
    /// When the migration was applied.
    pub migrated_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// Create a record stamped with the current time.
    pub fn new(name: impl Into<String>, group_id: i64) -> Self {
        Self {
            name: name.into(),
            group_id,
            migrated_at: Utc::now(),
        }
    }
}

/// Names of the tables that hold the ledger and the lock row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerTables {
    /// Ledger table name.
    pub table_name: String,
    /// Lock table name.
    pub locks_table_name: String,
}

impl Default for LedgerTables {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_LEDGER_TABLE.to_string(),
            locks_table_name: DEFAULT_LOCKS_TABLE.to_string(),
        }
    }
}

impl LedgerTables {
    /// Whether a table belongs to the ledger.
    pub fn contains(&self, table: &str) -> bool {
        self.table_name == table || self.locks_table_name == table
    }
}

/// Persisted migration history plus the lock row.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Table names this store works on.
    fn tables(&self) -> &LedgerTables;

    /// Create the ledger and lock tables if missing.
    async fn init(&self) -> MigrateResult<()>;

    /// Drop the ledger table and create it again, empty.
    async fn recreate(&self) -> MigrateResult<()>;

    /// Atomically insert the lock row; `false` when it already exists.
    async fn try_lock(&self) -> MigrateResult<bool>;

    /// Delete the lock row.
    async fn unlock(&self) -> MigrateResult<()>;

    /// All records, ascending by name.
    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Persist a record.
    async fn insert(&self, record: &MigrationRecord) -> MigrateResult<()>;

    /// Delete the record with the given name.
    async fn delete(&self, name: &str) -> MigrateResult<()>;
}

/// Migration lock to prevent concurrent migrations.
///
/// Release it with [`MigrationLock::release`]. A guard dropped without being
/// released (a cancelled or panicking caller) schedules the release on the
/// current tokio runtime.
pub struct MigrationLock {
    store: Option<Arc<dyn LedgerStore>>,
}

impl MigrationLock {
    /// Acquire the lock, failing with `LockHeld` if another process holds it.
    pub async fn acquire(store: Arc<dyn LedgerStore>) -> MigrateResult<Self> {
        if !store.try_lock().await? {
            return Err(MigrationError::LockHeld {
                table: store.tables().table_name.clone(),
            });
        }

        debug!(table = %store.tables().table_name, "Acquired migration lock");
        Ok(Self { store: Some(store) })
    }

    /// Release the lock.
    pub async fn release(mut self) -> MigrateResult<()> {
        match self.store.take() {
            Some(store) => {
                store.unlock().await?;
                debug!(table = %store.tables().table_name, "Released migration lock");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };

        let table = store.tables().table_name.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(%table, "Migration lock dropped without release; releasing in background");
                handle.spawn(async move {
                    if let Err(e) = store.unlock().await {
                        warn!(%table, error = %e, "Failed to release migration lock");
                    }
                });
            }
            Err(_) => {
                warn!(%table, "Migration lock dropped outside a runtime; lock row left in place");
            }
        }
    }
}

/// Release `lock` and combine the outcome with the guarded operation's result.
///
/// The operation's error wins over a release error, which is only logged.
pub(crate) async fn release_after<T>(
    lock: MigrationLock,
    result: MigrateResult<T>,
) -> MigrateResult<T> {
    let released = lock.release().await;
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "Failed to release migration lock after error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlagStore {
        tables: LedgerTables,
        locked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl LedgerStore for FlagStore {
        fn tables(&self) -> &LedgerTables {
            &self.tables
        }
        async fn init(&self) -> MigrateResult<()> {
            Ok(())
        }
        async fn recreate(&self) -> MigrateResult<()> {
            Ok(())
        }
        async fn try_lock(&self) -> MigrateResult<bool> {
            Ok(!self.locked.swap(true, Ordering::SeqCst))
        }
        async fn unlock(&self) -> MigrateResult<()> {
            self.locked.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
            Ok(Vec::new())
        }
        async fn insert(&self, _record: &MigrationRecord) -> MigrateResult<()> {
            Ok(())
        }
        async fn delete(&self, _name: &str) -> MigrateResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store: Arc<dyn LedgerStore> = Arc::new(FlagStore::default());

        let lock = MigrationLock::acquire(store.clone()).await.unwrap();
        let second = MigrationLock::acquire(store.clone()).await;
        assert!(matches!(second, Err(MigrationError::LockHeld { ref table }) if table == DEFAULT_LEDGER_TABLE));

        lock.release().await.unwrap();
        let again = MigrationLock::acquire(store).await.unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_lock_releases_in_background() {
        let flags = Arc::new(FlagStore::default());
        let store: Arc<dyn LedgerStore> = flags.clone();

        let lock = MigrationLock::acquire(store).await.unwrap();
        drop(lock);
        for _ in 0..10 {
            if !flags.locked.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!flags.locked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_after_prefers_operation_error() {
        let store: Arc<dyn LedgerStore> = Arc::new(FlagStore::default());
        let lock = MigrationLock::acquire(store).await.unwrap();

        let result: MigrateResult<()> =
            release_after(lock, Err(MigrationError::other("boom"))).await;
        assert_eq!(result.unwrap_err().to_string(), "boom");
    }

    #[test]
    fn test_ledger_tables_default() {
        let tables = LedgerTables::default();
        assert!(tables.contains("tidemark_migrations"));
        assert!(tables.contains("tidemark_migration_locks"));
        assert!(!tables.contains("users"));
    }
}
