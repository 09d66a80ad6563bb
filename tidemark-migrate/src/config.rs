//! Configuration for the migrator and the auto-migrator.
//!
//! Both configurations can be built in code or loaded from TOML:
//!
//! ```toml
//! migrations_dir = "./migrations"
//! rename_fk = true
//! exclude_tables = ["audit_log"]
//! rename_policy = "first_by_name"
//!
//! [migrator]
//! table_name = "tidemark_migrations"
//!
//! [renames.tables]
//! people = "persons"
//!
//! [renames.columns.persons]
//! surname = "last_name"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tidemark_schema::ForeignKey;

use crate::error::{MigrateResult, MigrationError};
use crate::history::{DEFAULT_LEDGER_TABLE, DEFAULT_LOCKS_TABLE, LedgerTables};

/// Configuration for the migrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigratorConfig {
    /// Ledger table name.
    pub table_name: String,
    /// Lock table name.
    pub locks_table_name: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_LEDGER_TABLE.to_string(),
            locks_table_name: DEFAULT_LOCKS_TABLE.to_string(),
        }
    }
}

impl MigratorConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ledger table name.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Set the lock table name.
    pub fn locks_table_name(mut self, name: impl Into<String>) -> Self {
        self.locks_table_name = name.into();
        self
    }

    /// The ledger table names.
    pub fn ledger_tables(&self) -> LedgerTables {
        LedgerTables {
            table_name: self.table_name.clone(),
            locks_table_name: self.locks_table_name.clone(),
        }
    }

    /// Check that the table names are usable.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.table_name.trim().is_empty() || self.locks_table_name.trim().is_empty() {
            return Err(MigrationError::config("ledger table names must not be empty"));
        }
        if self.table_name == self.locks_table_name {
            return Err(MigrationError::config(
                "ledger and lock tables must have different names",
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        Self::from_toml_str(&read_config(path.as_ref())?)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        let config: Self = parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// How the differ resolves equally good rename candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenamePolicy {
    /// Fail with `AmbiguousRename`.
    #[default]
    Strict,
    /// Pick the first candidate in name order.
    FirstByName,
}

/// Explicit renames that take precedence over detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenameHints {
    /// Current table name to target table name.
    pub tables: BTreeMap<String, String>,
    /// Per target table: current column name to target column name.
    pub columns: BTreeMap<String, BTreeMap<String, String>>,
}

impl RenameHints {
    /// Target name hinted for a current table.
    pub fn table(&self, current: &str) -> Option<&str> {
        self.tables.get(current).map(String::as_str)
    }

    /// Target name hinted for a column of a (target) table.
    pub fn column(&self, table: &str, current: &str) -> Option<&str> {
        self.columns
            .get(table)
            .and_then(|cols| cols.get(current))
            .map(String::as_str)
    }
}

/// Computes the constraint name of a foreign key.
#[derive(Clone)]
pub struct ForeignKeyNamer(Arc<dyn Fn(&ForeignKey) -> String + Send + Sync>);

impl ForeignKeyNamer {
    /// Wrap a naming function.
    pub fn new(f: impl Fn(&ForeignKey) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Name a foreign key.
    pub fn name(&self, fk: &ForeignKey) -> String {
        (self.0)(fk)
    }
}

impl fmt::Debug for ForeignKeyNamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ForeignKeyNamer(..)")
    }
}

/// Configuration for the auto-migrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoMigrateConfig {
    /// Ledger settings.
    pub migrator: MigratorConfig,
    /// Where generated migration files are written.
    pub migrations_dir: PathBuf,
    /// Rename foreign keys whose name differs from the expected name.
    pub rename_fk: bool,
    /// Tables the inspector ignores.
    pub exclude_tables: Vec<String>,
    /// Tie-breaking policy for rename detection.
    pub rename_policy: RenamePolicy,
    /// Minimum similarity score for a table rename.
    pub rename_threshold: f64,
    /// Explicit rename hints.
    pub renames: RenameHints,
    /// Foreign key naming function; set in code only.
    #[serde(skip)]
    pub fk_namer: Option<ForeignKeyNamer>,
}

impl Default for AutoMigrateConfig {
    fn default() -> Self {
        Self {
            migrator: MigratorConfig::default(),
            migrations_dir: PathBuf::from("./migrations"),
            rename_fk: false,
            exclude_tables: Vec::new(),
            rename_policy: RenamePolicy::default(),
            rename_threshold: 1.0,
            renames: RenameHints::default(),
            fk_namer: None,
        }
    }
}

impl AutoMigrateConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ledger settings.
    pub fn migrator(mut self, migrator: MigratorConfig) -> Self {
        self.migrator = migrator;
        self
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Enable or disable foreign key renaming.
    pub fn rename_fk(mut self, rename: bool) -> Self {
        self.rename_fk = rename;
        self
    }

    /// Exclude a table from inspection.
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        self.exclude_tables.push(table.into());
        self
    }

    /// Set the rename tie-breaking policy.
    pub fn rename_policy(mut self, policy: RenamePolicy) -> Self {
        self.rename_policy = policy;
        self
    }

    /// Set the table rename similarity threshold.
    pub fn rename_threshold(mut self, threshold: f64) -> Self {
        self.rename_threshold = threshold;
        self
    }

    /// Declare that a table was renamed.
    pub fn rename_table(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.tables.insert(from.into(), to.into());
        self
    }

    /// Declare that a column of `table` (target name) was renamed.
    pub fn rename_column(
        mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.renames
            .columns
            .entry(table.into())
            .or_default()
            .insert(from.into(), to.into());
        self
    }

    /// Set the foreign key naming function.
    pub fn fk_name_fn(mut self, f: impl Fn(&ForeignKey) -> String + Send + Sync + 'static) -> Self {
        self.fk_namer = Some(ForeignKeyNamer::new(f));
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> MigrateResult<()> {
        self.migrator.validate()?;
        if self.rename_threshold.is_nan() || self.rename_threshold <= 0.0 {
            return Err(MigrationError::config(format!(
                "rename_threshold must be positive, got {}",
                self.rename_threshold
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        Self::from_toml_str(&read_config(path.as_ref())?)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        let config: Self = parse_toml(content)?;
        config.validate()?;
        Ok(config)
    }
}

fn read_config(path: &Path) -> MigrateResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        MigrationError::config(format!("failed to read {}: {}", path.display(), e))
    })
}

fn parse_toml<T: serde::de::DeserializeOwned>(content: &str) -> MigrateResult<T> {
    toml::from_str(content).map_err(|e| MigrationError::config(e.to_string()))
}
