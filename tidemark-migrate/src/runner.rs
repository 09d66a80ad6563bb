//! The migration runner.
//!
//! A [`Migrator`] applies registered migrations in name order and records
//! each one in the ledger right after its Up action succeeds. Every call of
//! [`Migrator::migrate`] forms one group with a fresh id, and
//! [`Migrator::rollback`] reverts the most recent group in reverse order.
//! Failures stop the run without compensating: whatever completed stays
//! recorded and is reported in the error's group.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::MigratorConfig;
use crate::db::Database;
use crate::error::{MigrateResult, MigrationError};
use crate::history::{LedgerStore, MigrationLock, MigrationRecord, release_after};
use crate::migration::{Migration, MigrationGroup, Migrations};

/// Ledger state compared to the registered migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Recorded migrations, ascending by name.
    pub applied: Vec<MigrationRecord>,
    /// Registered migrations without a record, ascending by name.
    pub pending: Vec<String>,
    /// Highest recorded group id, 0 when nothing is recorded.
    pub last_group_id: i64,
}

impl MigrationStatus {
    /// Whether every registered migration is applied.
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get a summary of the status.
    pub fn summary(&self) -> String {
        format!(
            "{} applied, {} pending, last group #{}",
            self.applied.len(),
            self.pending.len(),
            self.last_group_id
        )
    }
}

/// Applies and reverts migrations against a database.
pub struct Migrator {
    db: Arc<dyn Database>,
    ledger: Arc<dyn LedgerStore>,
    migrations: Migrations,
    config: MigratorConfig,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("dialect", &self.db.dialect().name())
            .field("migrations", &self.migrations.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Migrator {
    /// Create a migrator over a set of registered migrations.
    pub fn new(
        db: Arc<dyn Database>,
        migrations: Migrations,
        config: MigratorConfig,
    ) -> MigrateResult<Self> {
        config.validate()?;
        let ledger = db.ledger(&config.ledger_tables());
        Ok(Self {
            db,
            ledger,
            migrations,
            config,
        })
    }

    /// The registered migrations.
    pub fn migrations(&self) -> &Migrations {
        &self.migrations
    }

    /// The migrator configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// The ledger store.
    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Create the ledger and lock tables if they do not exist.
    pub async fn init(&self) -> MigrateResult<()> {
        self.ledger.init().await
    }

    /// Recorded migrations, ascending by name.
    pub async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>> {
        self.init().await?;
        self.ledger.applied().await
    }

    /// Compare the ledger with the registered migrations.
    pub async fn status(&self) -> MigrateResult<MigrationStatus> {
        let applied = self.applied().await?;
        let pending = self
            .pending(&applied)
            .into_iter()
            .map(|m| m.name().to_string())
            .collect();
        let last_group_id = last_group_id(&applied);

        Ok(MigrationStatus {
            applied,
            pending,
            last_group_id,
        })
    }

    /// Apply every pending migration as a new group.
    ///
    /// Returns the empty group when nothing is pending. On failure the error
    /// is `MigrationFailed` carrying the migrations applied before it.
    #[instrument(skip(self), fields(table = %self.config.table_name))]
    pub async fn migrate(&self) -> MigrateResult<MigrationGroup> {
        self.init().await?;
        let lock = MigrationLock::acquire(self.ledger.clone()).await?;
        let result = self.migrate_locked().await;
        release_after(lock, result).await
    }

    async fn migrate_locked(&self) -> MigrateResult<MigrationGroup> {
        let applied = self.ledger.applied().await?;
        let pending = self.pending(&applied);
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(MigrationGroup::empty());
        }

        let mut group = MigrationGroup {
            id: last_group_id(&applied) + 1,
            migrations: Vec::with_capacity(pending.len()),
        };
        info!(group = group.id, count = pending.len(), "Applying migrations");

        for migration in pending {
            debug!(migration = %migration.name(), "Running up");
            let outcome = match migration.run_up(self.db.executor()).await {
                Ok(()) => {
                    let record = MigrationRecord::new(migration.name(), group.id);
                    self.ledger.insert(&record).await.map(|()| record)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(record) => group.migrations.push(record),
                Err(e) => {
                    warn!(migration = %migration.name(), error = %e, "Migration failed");
                    return Err(MigrationError::MigrationFailed {
                        name: migration.name().to_string(),
                        group,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(group = group.id, count = group.migrations.len(), "Applied migrations");
        Ok(group)
    }

    /// Revert the most recent group in descending name order.
    ///
    /// Returns the empty group when the ledger is empty.
    #[instrument(skip(self), fields(table = %self.config.table_name))]
    pub async fn rollback(&self) -> MigrateResult<MigrationGroup> {
        self.init().await?;
        let lock = MigrationLock::acquire(self.ledger.clone()).await?;
        let result = self.rollback_locked().await;
        release_after(lock, result).await
    }

    async fn rollback_locked(&self) -> MigrateResult<MigrationGroup> {
        let applied = self.ledger.applied().await?;
        let group_id = last_group_id(&applied);
        if group_id == 0 {
            info!("No migrations to roll back");
            return Ok(MigrationGroup::empty());
        }

        let mut records: Vec<MigrationRecord> = applied
            .into_iter()
            .filter(|r| r.group_id == group_id)
            .collect();
        records.sort_by(|a, b| b.name.cmp(&a.name));

        let mut steps = Vec::with_capacity(records.len());
        for record in records {
            let migration = self
                .migrations
                .get(&record.name)
                .ok_or_else(|| MigrationError::NotFound(record.name.clone()))?;
            steps.push((record, migration));
        }

        info!(group = group_id, count = steps.len(), "Rolling back migrations");
        let mut group = MigrationGroup {
            id: group_id,
            migrations: Vec::with_capacity(steps.len()),
        };

        for (record, migration) in steps {
            debug!(migration = %record.name, "Running down");
            let outcome = match migration.run_down(self.db.executor()).await {
                Ok(()) => self.ledger.delete(&record.name).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                warn!(migration = %record.name, error = %e, "Rollback failed");
                return Err(MigrationError::MigrationFailed {
                    name: record.name,
                    group,
                    source: Box::new(e),
                });
            }
            group.migrations.push(record);
        }

        info!(group = group.id, count = group.migrations.len(), "Rolled back migrations");
        Ok(group)
    }

    /// Drop and recreate the ledger table, forgetting every record.
    #[instrument(skip(self), fields(table = %self.config.table_name))]
    pub async fn reset(&self) -> MigrateResult<()> {
        self.init().await?;
        let lock = MigrationLock::acquire(self.ledger.clone()).await?;
        let result = self.ledger.recreate().await;
        release_after(lock, result).await?;
        info!("Reset migration ledger");
        Ok(())
    }

    /// Record every pending migration as a new group without running it.
    #[instrument(skip(self), fields(table = %self.config.table_name))]
    pub async fn mark_applied(&self) -> MigrateResult<MigrationGroup> {
        self.init().await?;
        let lock = MigrationLock::acquire(self.ledger.clone()).await?;
        let result = self.mark_applied_locked().await;
        release_after(lock, result).await
    }

    async fn mark_applied_locked(&self) -> MigrateResult<MigrationGroup> {
        let applied = self.ledger.applied().await?;
        let pending = self.pending(&applied);
        if pending.is_empty() {
            return Ok(MigrationGroup::empty());
        }

        let mut group = MigrationGroup {
            id: last_group_id(&applied) + 1,
            migrations: Vec::with_capacity(pending.len()),
        };
        for migration in pending {
            let record = MigrationRecord::new(migration.name(), group.id);
            self.ledger.insert(&record).await?;
            group.migrations.push(record);
        }

        info!(group = group.id, count = group.migrations.len(), "Marked migrations as applied");
        Ok(group)
    }

    fn pending(&self, applied: &[MigrationRecord]) -> Vec<&Migration> {
        let recorded: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        self.migrations
            .iter()
            .filter(|m| !recorded.contains(m.name()))
            .collect()
    }
}

fn last_group_id(applied: &[MigrationRecord]) -> i64 {
    applied.iter().map(|r| r.group_id).max().unwrap_or(0)
}
