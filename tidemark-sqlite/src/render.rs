//! SQLite DDL rendering and type rules.
//!
//! SQLite's `ALTER TABLE` only renames tables and columns, adds columns and
//! drops columns. Operations needing a table rebuild (type, nullability,
//! default and identity changes, primary keys and foreign keys on existing
//! tables) are rejected with `Unsupported`. Unique constraints are created as
//! unique indexes so they can be added and dropped independently.
//!
//! Foreign keys can only be declared in `CREATE TABLE`, so when a batch both
//! creates a table and adds its foreign keys the keys are folded into the
//! table definition. Dropping the keys of a table dropped in the same batch
//! renders nothing.

use std::collections::{BTreeMap, BTreeSet};

use tidemark_migrate::sql::{foreign_key_name, quote_columns, quote_ident};
use tidemark_migrate::{DiffOperation, Dialect, MigrateResult, MigrationError, Renders};
use tidemark_schema::{Column, ForeignKey, Table, UniqueConstraint};

const DIALECT: &str = "sqlite";

/// SQL generator for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteRenderer;

impl SqliteRenderer {
    fn create_table(
        &self,
        table: &Table,
        foreign_keys: &[(&ForeignKey, &str)],
    ) -> MigrateResult<Vec<String>> {
        let pk_columns = table
            .primary_key
            .as_ref()
            .map(|pk| pk.columns.as_slice())
            .unwrap_or_default();

        let mut inline_pk = false;
        let mut lines = Vec::with_capacity(table.columns.len() + 1);
        for column in table.columns.values() {
            if column.identity {
                if pk_columns.len() != 1 || pk_columns[0] != column.name {
                    return Err(MigrationError::unsupported(
                        DIALECT,
                        format!(
                            "identity column `{}.{}` outside a single-column primary key",
                            table.name, column.name
                        ),
                    ));
                }
                inline_pk = true;
            }
            lines.push(self.column_definition(column));
        }

        if !inline_pk && !pk_columns.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", quote_columns(pk_columns)));
        }
        for (fk, name) in foreign_keys {
            lines.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&foreign_key_name(fk, name)),
                quote_columns(&fk.from.columns),
                quote_ident(&fk.to.table),
                quote_columns(&fk.to.columns)
            ));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(&table.name),
            lines.join(",\n    ")
        )];
        statements.extend(
            table
                .unique_constraints
                .iter()
                .map(|u| self.create_unique_index(&table.name, u)),
        );
        Ok(statements)
    }

    /// Column definition; an identity column becomes the rowid alias.
    fn column_definition(&self, column: &Column) -> String {
        let mut parts = vec![quote_ident(&column.name)];

        if column.identity {
            parts.push("INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        } else {
            parts.push(column.full_type());
        }
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }

    fn create_unique_index(&self, table: &str, unique: &UniqueConstraint) -> String {
        format!(
            "CREATE UNIQUE INDEX {} ON {} ({});",
            quote_ident(&unique.name_or_default(table)),
            quote_ident(table),
            quote_columns(&unique.columns)
        )
    }
}

impl Renders for SqliteRenderer {
    fn render(&self, op: &DiffOperation) -> MigrateResult<Vec<String>> {
        use DiffOperation::*;

        let sql = match op {
            CreateTable { table } => return self.create_table(table, &[]),
            DropTable { table } => format!("DROP TABLE IF EXISTS {};", quote_ident(&table.name)),
            RenameTable { from, to } => format!(
                "ALTER TABLE {} RENAME TO {};",
                quote_ident(from),
                quote_ident(to)
            ),
            AddColumn { table, column } => {
                if column.identity {
                    return Err(MigrationError::unsupported(DIALECT, "adding an identity column"));
                }
                format!(
                    "ALTER TABLE {} ADD COLUMN {};",
                    quote_ident(table),
                    self.column_definition(column)
                )
            }
            DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {};",
                quote_ident(table),
                quote_ident(&column.name)
            ),
            RenameColumn { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {};",
                quote_ident(table),
                quote_ident(from),
                quote_ident(to)
            ),
            AddUniqueConstraint { table, unique } => self.create_unique_index(table, unique),
            DropUniqueConstraint { table, unique } => format!(
                "DROP INDEX IF EXISTS {};",
                quote_ident(&unique.name_or_default(table))
            ),
            other => return Err(MigrationError::unsupported(DIALECT, other.kind())),
        };

        Ok(vec![sql])
    }

    fn render_all(&self, ops: &[DiffOperation]) -> MigrateResult<Vec<String>> {
        let mut created: BTreeMap<&str, Vec<(&ForeignKey, &str)>> = BTreeMap::new();
        let mut dropped = BTreeSet::new();
        for op in ops {
            match op {
                DiffOperation::CreateTable { table } => {
                    created.entry(table.name.as_str()).or_default();
                }
                DiffOperation::DropTable { table } => {
                    dropped.insert(table.name.as_str());
                }
                _ => {}
            }
        }
        for op in ops {
            if let DiffOperation::AddForeignKey { foreign_key, name } = op {
                if let Some(inline) = created.get_mut(foreign_key.from.table.as_str()) {
                    inline.push((foreign_key, name.as_str()));
                }
            }
        }

        let mut statements = Vec::new();
        for op in ops {
            match op {
                DiffOperation::CreateTable { table } => {
                    let inline = created
                        .get(table.name.as_str())
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    statements.extend(self.create_table(table, inline)?);
                }
                DiffOperation::AddForeignKey { foreign_key, .. }
                    if created.contains_key(foreign_key.from.table.as_str()) => {}
                DiffOperation::DropForeignKey { foreign_key, .. }
                    if dropped.contains(foreign_key.from.table.as_str()) => {}
                other => statements.extend(self.render(other)?),
            }
        }
        Ok(statements)
    }
}

/// Storage class SQLite derives from a declared type.
///
/// Follows SQLite's type affinity rules, so `bigint` and `integer` compare
/// equal while `varchar` and `text` both have text affinity.
pub fn type_affinity(sql_type: &str) -> &'static str {
    let lowered = sql_type.to_ascii_lowercase();
    if lowered.contains("int") {
        "integer"
    } else if lowered.contains("char") || lowered.contains("clob") || lowered.contains("text") {
        "text"
    } else if lowered.contains("blob") || lowered.trim().is_empty() {
        "blob"
    } else if lowered.contains("real") || lowered.contains("floa") || lowered.contains("doub") {
        "real"
    } else {
        "numeric"
    }
}

/// The SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect {
    renderer: SqliteRenderer,
}

impl SqliteDialect {
    /// Create the dialect.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &str {
        DIALECT
    }

    fn renderer(&self) -> &dyn Renders {
        &self.renderer
    }

    fn default_schema(&self) -> &str {
        "main"
    }

    fn canonical_type(&self, sql_type: &str) -> String {
        type_affinity(sql_type).to_string()
    }
}
