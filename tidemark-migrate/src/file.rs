//! Migration file management.
//!
//! A migration on disk is a pair of files sharing a name prefix:
//! `<name>.up.sql` and `<name>.down.sql`. Statements inside a file are
//! separated by a line containing only [`STATEMENT_SPLIT`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateResult, MigrationError};

/// Marker line separating statements in a migration file.
pub const STATEMENT_SPLIT: &str = "--tidemark:split";

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// A migration file pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Migration name (file prefix).
    pub name: String,
    /// Statements applying the migration.
    pub up: Vec<String>,
    /// Statements reverting the migration.
    pub down: Vec<String>,
}

impl MigrationFile {
    /// Create a new migration file pair.
    pub fn new(name: impl Into<String>, up: Vec<String>, down: Vec<String>) -> Self {
        Self {
            name: name.into(),
            up,
            down,
        }
    }

    /// File name of the up script.
    pub fn up_file_name(&self) -> String {
        format!("{}{}", self.name, UP_SUFFIX)
    }

    /// File name of the down script.
    pub fn down_file_name(&self) -> String {
        format!("{}{}", self.name, DOWN_SUFFIX)
    }
}

/// Split file contents into statements at [`STATEMENT_SPLIT`] lines.
pub fn split_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim() == STATEMENT_SPLIT {
            push_statement(&mut statements, &current);
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Join statements into file contents, inverse of [`split_statements`].
pub fn join_statements(statements: &[String]) -> String {
    let mut content = statements.join(&format!("\n{}\n", STATEMENT_SPLIT));
    if !content.is_empty() {
        content.push('\n');
    }
    content
}

/// Migration file reader/writer.
pub struct MigrationFileManager {
    /// Directory where migrations are stored.
    migrations_dir: PathBuf,
}

impl MigrationFileManager {
    /// Create a new file manager.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// Ensure the migrations directory exists.
    pub async fn ensure_dir(&self) -> MigrateResult<()> {
        tokio::fs::create_dir_all(&self.migrations_dir)
            .await
            .map_err(MigrationError::Io)?;
        Ok(())
    }

    /// Names of all migrations in the directory, sorted.
    pub async fn list_names(&self) -> MigrateResult<Vec<String>> {
        let mut names = Vec::new();

        if !tokio::fs::try_exists(&self.migrations_dir).await? {
            return Ok(names);
        }

        let mut entries = tokio::fs::read_dir(&self.migrations_dir)
            .await
            .map_err(MigrationError::Io)?;

        while let Some(entry) = entries.next_entry().await.map_err(MigrationError::Io)? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let name = file_name
                .strip_suffix(UP_SUFFIX)
                .or_else(|| file_name.strip_suffix(DOWN_SUFFIX));
            if let Some(name) = name {
                names.push(name.to_string());
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Read every migration pair in the directory, sorted by name.
    ///
    /// A missing down file means the migration has nothing to revert; a down
    /// file without its up file is an error.
    pub async fn list_migrations(&self) -> MigrateResult<Vec<MigrationFile>> {
        let mut migrations = Vec::new();

        for name in self.list_names().await? {
            let up_path = self.migrations_dir.join(format!("{}{}", name, UP_SUFFIX));
            let down_path = self.migrations_dir.join(format!("{}{}", name, DOWN_SUFFIX));

            if !tokio::fs::try_exists(&up_path).await? {
                return Err(MigrationError::migration_file(format!(
                    "`{}` has a down script but no up script",
                    name
                )));
            }

            let up_sql = tokio::fs::read_to_string(&up_path)
                .await
                .map_err(MigrationError::Io)?;
            let down_sql = if tokio::fs::try_exists(&down_path).await? {
                tokio::fs::read_to_string(&down_path)
                    .await
                    .map_err(MigrationError::Io)?
            } else {
                String::new()
            };

            migrations.push(MigrationFile {
                name,
                up: split_statements(&up_sql),
                down: split_statements(&down_sql),
            });
        }

        debug!(
            dir = %self.migrations_dir.display(),
            count = migrations.len(),
            "Read migration files"
        );
        Ok(migrations)
    }

    /// Write a migration pair, returning the up and down paths.
    pub async fn write_migration(
        &self,
        migration: &MigrationFile,
    ) -> MigrateResult<(PathBuf, PathBuf)> {
        self.ensure_dir().await?;

        let up_path = self.migrations_dir.join(migration.up_file_name());
        let down_path = self.migrations_dir.join(migration.down_file_name());

        tokio::fs::write(&up_path, join_statements(&migration.up))
            .await
            .map_err(MigrationError::Io)?;
        tokio::fs::write(&down_path, join_statements(&migration.down))
            .await
            .map_err(MigrationError::Io)?;

        debug!(name = %migration.name, "Wrote migration files");
        Ok((up_path, down_path))
    }

    /// Delete a migration pair; files that are already gone are ignored.
    pub async fn remove_migration(&self, migration: &MigrationFile) -> MigrateResult<()> {
        for file_name in [migration.up_file_name(), migration.down_file_name()] {
            match tokio::fs::remove_file(self.migrations_dir.join(file_name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MigrationError::Io(e)),
            }
        }

        debug!(name = %migration.name, "Removed migration files");
        Ok(())
    }
}
