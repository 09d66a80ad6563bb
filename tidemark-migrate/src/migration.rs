//! Migration definitions and the ordered migration registry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::db::Executor;
use crate::error::{MigrateResult, MigrationError};
use crate::file::MigrationFileManager;
use crate::history::MigrationRecord;

/// One direction of a migration.
#[async_trait::async_trait]
pub trait MigrationAction: Send + Sync {
    /// Run the action against the database.
    async fn run(&self, db: &dyn Executor) -> MigrateResult<()>;
}

/// Runs a list of SQL statements, in one transaction when the executor
/// supports transactional DDL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlAction(pub Vec<String>);

impl SqlAction {
    /// Create an action from statements.
    pub fn new<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(statements.into_iter().map(Into::into).collect())
    }

    /// The statements.
    pub fn statements(&self) -> &[String] {
        &self.0
    }
}

#[async_trait::async_trait]
impl MigrationAction for SqlAction {
    async fn run(&self, db: &dyn Executor) -> MigrateResult<()> {
        if self.0.is_empty() {
            return Ok(());
        }
        if db.supports_transactional_ddl() {
            return db.execute_in_transaction(&self.0).await;
        }
        for statement in &self.0 {
            db.execute(statement).await?;
        }
        Ok(())
    }
}

/// Runs a closure returning a boxed future.
pub struct FnAction<F>(F);

impl<F> FnAction<F>
where
    F: for<'a> Fn(&'a dyn Executor) -> BoxFuture<'a, MigrateResult<()>> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F> MigrationAction for FnAction<F>
where
    F: for<'a> Fn(&'a dyn Executor) -> BoxFuture<'a, MigrateResult<()>> + Send + Sync,
{
    async fn run(&self, db: &dyn Executor) -> MigrateResult<()> {
        (self.0)(db).await
    }
}

/// A named, reversible migration.
#[derive(Clone)]
pub struct Migration {
    name: String,
    comment: Option<String>,
    up: Arc<dyn MigrationAction>,
    down: Arc<dyn MigrationAction>,
}

impl Migration {
    /// Create a migration whose actions do nothing until set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            up: Arc::new(SqlAction::default()),
            down: Arc::new(SqlAction::default()),
        }
    }

    /// Create a migration from up and down statements.
    pub fn sql(name: impl Into<String>, up: Vec<String>, down: Vec<String>) -> Self {
        Self::new(name).up(SqlAction(up)).down(SqlAction(down))
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the up action.
    pub fn up(mut self, action: impl MigrationAction + 'static) -> Self {
        self.up = Arc::new(action);
        self
    }

    /// Set the down action.
    pub fn down(mut self, action: impl MigrationAction + 'static) -> Self {
        self.down = Arc::new(action);
        self
    }

    /// Set the up action from a closure.
    pub fn up_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Executor) -> BoxFuture<'a, MigrateResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.up(FnAction::new(f))
    }

    /// Set the down action from a closure.
    pub fn down_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Executor) -> BoxFuture<'a, MigrateResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.down(FnAction::new(f))
    }

    /// Migration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional comment.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Run the up action.
    pub async fn run_up(&self, db: &dyn Executor) -> MigrateResult<()> {
        self.up.run(db).await
    }

    /// Run the down action.
    pub async fn run_down(&self, db: &dyn Executor) -> MigrateResult<()> {
        self.down.run(db).await
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

/// Registered migrations, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct Migrations {
    migrations: BTreeMap<String, Migration>,
}

impl Migrations {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration, rejecting duplicate names.
    pub fn register(&mut self, migration: Migration) -> MigrateResult<()> {
        if self.migrations.contains_key(migration.name()) {
            return Err(MigrationError::DuplicateMigration(
                migration.name().to_string(),
            ));
        }
        self.migrations
            .insert(migration.name().to_string(), migration);
        Ok(())
    }

    /// Register a migration, builder style.
    pub fn with(mut self, migration: Migration) -> MigrateResult<Self> {
        self.register(migration)?;
        Ok(self)
    }

    /// Build a registry from migrations, rejecting duplicate names.
    pub fn try_from_iter(iter: impl IntoIterator<Item = Migration>) -> MigrateResult<Self> {
        let mut migrations = Self::new();
        for migration in iter {
            migrations.register(migration)?;
        }
        Ok(migrations)
    }

    /// Load the SQL migrations stored in a directory.
    pub async fn discover(dir: impl AsRef<Path>) -> MigrateResult<Self> {
        let files = MigrationFileManager::new(dir.as_ref())
            .list_migrations()
            .await?;

        Self::try_from_iter(
            files
                .into_iter()
                .map(|file| Migration::sql(file.name, file.up, file.down)),
        )
    }

    /// Look up a migration by name.
    pub fn get(&self, name: &str) -> Option<&Migration> {
        self.migrations.get(name)
    }

    /// Migrations in ascending name order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    /// Names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.migrations.keys().map(String::as_str)
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Migrations applied or rolled back together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationGroup {
    /// Group id; 0 means nothing happened.
    pub id: i64,
    /// Records in processing order.
    pub migrations: Vec<MigrationRecord>,
}

impl MigrationGroup {
    /// The empty group.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing was applied or rolled back.
    pub fn is_zero(&self) -> bool {
        self.id == 0 && self.migrations.is_empty()
    }

    /// Names in processing order.
    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name.as_str()).collect()
    }
}

impl fmt::Display for MigrationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "there are no new migrations to run");
        }
        write!(
            f,
            "group #{} ({} migrations)",
            self.id,
            self.migrations.len()
        )
    }
}
