//! Automatic migrations from model declarations.
//!
//! The [`AutoMigrator`] inspects the live database, builds the target schema
//! from the registered models and diffs the two. The resulting operations are
//! rendered into an up/down SQL file pair named `YYYYMMDDHHMMSS_auto` and,
//! for [`AutoMigrator::migrate`], applied through a [`Migrator`] as one group.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use tidemark_schema::{BuildSchema, SchemaState};
use tracing::{info, instrument, warn};

use crate::config::AutoMigrateConfig;
use crate::db::Database;
use crate::diff::{DiffOptions, Differ, SchemaDiff};
use crate::error::{MigrateResult, MigrationError};
use crate::file::{MigrationFile, MigrationFileManager};
use crate::introspect::Inspector;
use crate::migration::{Migration, MigrationGroup, Migrations};
use crate::runner::Migrator;
use crate::sql::MigrationSql;

const NAME_SUFFIX: &str = "_auto";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// The compared schemas and the operations between them.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Inspected schema.
    pub current: SchemaState,
    /// Schema built from the models.
    pub target: SchemaState,
    /// Operations turning `current` into `target`, and back.
    pub diff: SchemaDiff,
}

impl MigrationPlan {
    /// Check if there is nothing to migrate.
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}

/// A migration file pair written to disk.
#[derive(Debug, Clone)]
pub struct GeneratedMigration {
    /// Migration contents.
    pub file: MigrationFile,
    /// Path of the up file.
    pub up_path: PathBuf,
    /// Path of the down file.
    pub down_path: PathBuf,
}

/// Reconciles a database with model declarations.
pub struct AutoMigrator {
    db: Arc<dyn Database>,
    models: Arc<dyn BuildSchema>,
    config: AutoMigrateConfig,
    inspector: Inspector,
    files: MigrationFileManager,
}

impl std::fmt::Debug for AutoMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoMigrator")
            .field("dialect", &self.db.dialect().name())
            .field("models", &self.models.model_count())
            .field("config", &self.config)
            .finish()
    }
}

impl AutoMigrator {
    /// Create an auto-migrator.
    ///
    /// Fails `NoModelsRegistered` for an empty model set and
    /// `InspectionUnsupported` when the database cannot be inspected.
    pub fn new(
        db: Arc<dyn Database>,
        models: impl BuildSchema + 'static,
        config: AutoMigrateConfig,
    ) -> MigrateResult<Self> {
        Self::with_shared_models(db, Arc::new(models), config)
    }

    /// Create an auto-migrator over shared models.
    pub fn with_shared_models(
        db: Arc<dyn Database>,
        models: Arc<dyn BuildSchema>,
        config: AutoMigrateConfig,
    ) -> MigrateResult<Self> {
        config.validate()?;
        if models.model_count() == 0 {
            return Err(MigrationError::NoModelsRegistered);
        }

        let inspector = Inspector::new(db.clone(), config.exclude_tables.clone())?
            .with_ledger_tables(config.migrator.ledger_tables());
        let files = MigrationFileManager::new(&config.migrations_dir);

        Ok(Self {
            db,
            models,
            config,
            inspector,
            files,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &AutoMigrateConfig {
        &self.config
    }

    /// The schema inspector.
    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    /// Inspect the database, build the target schema and diff them.
    #[instrument(skip(self), fields(dialect = %self.db.dialect().name()))]
    pub async fn plan(&self) -> MigrateResult<MigrationPlan> {
        let current = self.inspector.inspect().await?;
        let target = self
            .models
            .build_schema(self.db.dialect().default_schema())?
            .without_tables(&self.config.exclude_tables);

        let diff = Differ::new(self.db.dialect(), DiffOptions::from(&self.config))
            .diff(&current, &target)?;
        info!(changes = %diff.summary(), "Planned schema changes");

        Ok(MigrationPlan {
            current,
            target,
            diff,
        })
    }

    /// Write the SQL for the pending schema changes without executing it.
    ///
    /// Fails `NoChanges` when the database already matches the models.
    #[instrument(skip(self))]
    pub async fn create_sql_migrations(&self) -> MigrateResult<GeneratedMigration> {
        let plan = self.plan().await?;
        if plan.is_empty() {
            return Err(MigrationError::NoChanges);
        }
        self.write(&plan.diff).await
    }

    /// Apply the pending schema changes as a new migration group.
    ///
    /// An empty diff writes nothing and returns the empty group. When the
    /// generated migration is not applied (the lock is held or a statement
    /// fails) its file pair is removed again.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> MigrateResult<MigrationGroup> {
        let plan = self.plan().await?;
        if plan.is_empty() {
            info!("Schema is up to date");
            return Ok(MigrationGroup::empty());
        }

        let generated = self.write(&plan.diff).await?;
        let result = self.apply(generated.file.clone()).await;

        if let Err(e) = &result {
            warn!(name = %generated.file.name, error = %e, "Migration not applied, removing its files");
            if let Err(remove) = self.files.remove_migration(&generated.file).await {
                warn!(name = %generated.file.name, error = %remove, "Failed to remove migration files");
            }
        }
        result
    }

    async fn apply(&self, file: MigrationFile) -> MigrateResult<MigrationGroup> {
        let migrations = Migrations::new().with(Migration::sql(file.name, file.up, file.down))?;
        Migrator::new(self.db.clone(), migrations, self.config.migrator.clone())?
            .migrate()
            .await
    }

    /// Roll back the last group using the migrations stored on disk.
    #[instrument(skip(self))]
    pub async fn rollback(&self) -> MigrateResult<MigrationGroup> {
        let migrations = Migrations::discover(self.files.migrations_dir()).await?;
        Migrator::new(self.db.clone(), migrations, self.config.migrator.clone())?
            .rollback()
            .await
    }

    async fn write(&self, diff: &SchemaDiff) -> MigrateResult<GeneratedMigration> {
        let sql = MigrationSql::render(self.db.dialect().renderer(), diff)?;
        let name = self.next_name().await?;
        let file = MigrationFile::new(name, sql.up, sql.down);

        let (up_path, down_path) = self.files.write_migration(&file).await?;
        info!(name = %file.name, statements = file.up.len(), "Created migration");

        Ok(GeneratedMigration {
            file,
            up_path,
            down_path,
        })
    }

    async fn next_name(&self) -> MigrateResult<String> {
        let ledger = self.db.ledger(&self.config.migrator.ledger_tables());
        ledger.init().await?;

        let mut existing: Vec<String> = ledger.applied().await?.into_iter().map(|r| r.name).collect();
        existing.extend(self.files.list_names().await?);

        next_migration_name(Utc::now(), existing.iter().map(String::as_str))
    }
}

/// Name a migration created at `now` so it sorts after every existing name.
///
/// The timestamp is bumped one second at a time past the latest name.
pub fn next_migration_name<'a>(
    now: DateTime<Utc>,
    existing: impl IntoIterator<Item = &'a str>,
) -> MigrateResult<String> {
    let name_at = |at: DateTime<Utc>| format!("{}{}", at.format(TIMESTAMP_FORMAT), NAME_SUFFIX);

    let Some(latest) = existing.into_iter().max() else {
        return Ok(name_at(now));
    };

    let mut at = match timestamp_prefix(latest) {
        Some(floor) if floor > now => floor,
        _ => now,
    };
    for _ in 0..3 {
        let name = name_at(at);
        if name.as_str() > latest {
            return Ok(name);
        }
        at += Duration::seconds(1);
    }

    Err(MigrationError::other(format!(
        "cannot name a migration to sort after `{}`",
        latest
    )))
}

fn timestamp_prefix(name: &str) -> Option<DateTime<Utc>> {
    let prefix = name.get(..14)?;
    NaiveDateTime::parse_from_str(prefix, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(s: &str) -> DateTime<Utc> {
        timestamp_prefix(s).unwrap()
    }

    #[test]
    fn test_name_from_timestamp() {
        let name = next_migration_name(at("20240301120000"), std::iter::empty()).unwrap();
        assert_eq!(name, "20240301120000_auto");
    }

    #[test]
    fn test_name_bumped_past_existing() {
        let now = at("20240301120000");
        let name = next_migration_name(now, ["20240301120000_auto"]).unwrap();
        assert_eq!(name, "20240301120001_auto");

        let name = next_migration_name(now, ["20240301120000_auto", "20240301120005_init"]).unwrap();
        assert_eq!(name, "20240301120006_auto");
    }

    #[test]
    fn test_older_names_do_not_bump() {
        let name = next_migration_name(at("20240301120000"), ["20200101000000_init"]).unwrap();
        assert_eq!(name, "20240301120000_auto");
    }

    #[test]
    fn test_unorderable_name_is_rejected() {
        assert!(next_migration_name(at("20240301120000"), ["zzz"]).is_err());
    }
}
