//! SQL generation for migrations.

use tidemark_schema::{Column, ForeignKey, PrimaryKey, Table, UniqueConstraint};

use crate::db::Dialect;
use crate::diff::{DiffOperation, SchemaDiff};
use crate::error::MigrateResult;

/// Renders diff operations as DDL statements.
pub trait Renders: Send + Sync {
    /// Render one operation. A dialect that cannot express the operation
    /// returns `Unsupported`.
    fn render(&self, op: &DiffOperation) -> MigrateResult<Vec<String>>;

    /// Render a list of operations in order.
    fn render_all(&self, ops: &[DiffOperation]) -> MigrateResult<Vec<String>> {
        let mut statements = Vec::new();
        for op in ops {
            statements.extend(self.render(op)?);
        }
        Ok(statements)
    }
}

/// Generated SQL for a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSql {
    /// Statements applying the migration.
    pub up: Vec<String>,
    /// Statements reverting the migration.
    pub down: Vec<String>,
}

impl MigrationSql {
    /// Render both directions of a diff.
    pub fn render(renderer: &dyn Renders, diff: &SchemaDiff) -> MigrateResult<Self> {
        Ok(Self {
            up: renderer.render_all(&diff.up)?,
            down: renderer.render_all(&diff.down)?,
        })
    }

    /// Check if the migration is empty.
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }
}

/// Quote an identifier with double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote and comma-join a column list.
pub fn quote_columns(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Conventional primary key constraint name: `<table>_pkey`.
pub fn primary_key_name(table: &str, pk: &PrimaryKey) -> String {
    pk.name_or_default(table)
}

/// Foreign key constraint name, falling back to `<table>_<columns>_fkey`.
pub fn foreign_key_name(fk: &ForeignKey, name: &str) -> String {
    if name.is_empty() {
        fk.default_name()
    } else {
        name.to_string()
    }
}

/// SQL generator for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresRenderer;

impl PostgresRenderer {
    /// Generate CREATE TABLE statement.
    fn create_table(&self, table: &Table) -> String {
        let mut lines: Vec<String> = table
            .columns
            .values()
            .map(|c| self.column_definition(c))
            .collect();

        if let Some(pk) = &table.primary_key {
            lines.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_ident(&primary_key_name(&table.name, pk)),
                quote_columns(&pk.columns)
            ));
        }

        for unique in &table.unique_constraints {
            lines.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                quote_ident(&unique.name_or_default(&table.name)),
                quote_columns(&unique.columns)
            ));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(&table.name),
            lines.join(",\n    ")
        )
    }

    /// Generate column definition.
    fn column_definition(&self, column: &Column) -> String {
        let mut parts = vec![quote_ident(&column.name), column.full_type()];

        if column.identity {
            parts.push("GENERATED BY DEFAULT AS IDENTITY".to_string());
        }
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }

    fn alter_table(&self, table: &str, action: impl std::fmt::Display) -> String {
        format!("ALTER TABLE {} {};", quote_ident(table), action)
    }

    fn alter_column(&self, table: &str, column: &str, action: impl std::fmt::Display) -> String {
        self.alter_table(
            table,
            format!("ALTER COLUMN {} {}", quote_ident(column), action),
        )
    }

    fn add_unique(&self, table: &str, unique: &UniqueConstraint) -> String {
        self.alter_table(
            table,
            format!(
                "ADD CONSTRAINT {} UNIQUE ({})",
                quote_ident(&unique.name_or_default(table)),
                quote_columns(&unique.columns)
            ),
        )
    }

    fn add_foreign_key(&self, fk: &ForeignKey, name: &str) -> String {
        self.alter_table(
            &fk.from.table,
            format!(
                "ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&foreign_key_name(fk, name)),
                quote_columns(&fk.from.columns),
                quote_ident(&fk.to.table),
                quote_columns(&fk.to.columns)
            ),
        )
    }
}

impl Renders for PostgresRenderer {
    fn render(&self, op: &DiffOperation) -> MigrateResult<Vec<String>> {
        use DiffOperation::*;

        let sql = match op {
            CreateTable { table } => self.create_table(table),
            DropTable { table } => format!("DROP TABLE IF EXISTS {};", quote_ident(&table.name)),
            RenameTable { from, to } => {
                self.alter_table(from, format!("RENAME TO {}", quote_ident(to)))
            }
            AddColumn { table, column } => {
                self.alter_table(table, format!("ADD COLUMN {}", self.column_definition(column)))
            }
            DropColumn { table, column } => self.alter_table(
                table,
                format!("DROP COLUMN IF EXISTS {}", quote_ident(&column.name)),
            ),
            RenameColumn { table, from, to } => self.alter_table(
                table,
                format!("RENAME COLUMN {} TO {}", quote_ident(from), quote_ident(to)),
            ),
            AlterColumnType {
                table,
                column,
                from,
                to,
            } => {
                let new_type = to.full_type();
                if is_auto_castable(&from.sql_type, &to.sql_type) {
                    self.alter_column(table, column, format!("TYPE {}", new_type))
                } else {
                    self.alter_column(
                        table,
                        column,
                        format!("TYPE {} USING {}::{}", new_type, quote_ident(column), new_type),
                    )
                }
            }
            AlterColumnNullability {
                table,
                column,
                nullable,
            } => self.alter_column(
                table,
                column,
                if *nullable { "DROP NOT NULL" } else { "SET NOT NULL" },
            ),
            AlterColumnDefault {
                table, column, to, ..
            } => match to {
                Some(expr) => self.alter_column(table, column, format!("SET DEFAULT {}", expr)),
                None => self.alter_column(table, column, "DROP DEFAULT"),
            },
            AlterColumnIdentity {
                table,
                column,
                identity,
            } => self.alter_column(
                table,
                column,
                if *identity {
                    "ADD GENERATED BY DEFAULT AS IDENTITY"
                } else {
                    "DROP IDENTITY IF EXISTS"
                },
            ),
            AddPrimaryKey { table, primary_key } => self.alter_table(
                table,
                format!(
                    "ADD CONSTRAINT {} PRIMARY KEY ({})",
                    quote_ident(&primary_key_name(table, primary_key)),
                    quote_columns(&primary_key.columns)
                ),
            ),
            DropPrimaryKey { table, primary_key } => self.alter_table(
                table,
                format!(
                    "DROP CONSTRAINT {}",
                    quote_ident(&primary_key_name(table, primary_key))
                ),
            ),
            AddUniqueConstraint { table, unique } => self.add_unique(table, unique),
            DropUniqueConstraint { table, unique } => self.alter_table(
                table,
                format!(
                    "DROP CONSTRAINT {}",
                    quote_ident(&unique.name_or_default(table))
                ),
            ),
            AddForeignKey { foreign_key, name } => self.add_foreign_key(foreign_key, name),
            DropForeignKey { foreign_key, name } => self.alter_table(
                &foreign_key.from.table,
                format!(
                    "DROP CONSTRAINT {}",
                    quote_ident(&foreign_key_name(foreign_key, name))
                ),
            ),
            RenameForeignKey {
                foreign_key,
                from,
                to,
            } => self.alter_table(
                &foreign_key.from.table,
                format!(
                    "RENAME CONSTRAINT {} TO {}",
                    quote_ident(from),
                    quote_ident(to)
                ),
            ),
        };

        Ok(vec![sql])
    }
}

/// Canonical PostgreSQL spelling of a type name.
pub fn postgres_canonical_type(sql_type: &str) -> String {
    let lowered = sql_type.trim().to_ascii_lowercase();
    let canonical = match lowered.as_str() {
        "int2" | "smallint" | "smallserial" => "smallint",
        "int" | "int4" | "integer" | "serial" => "integer",
        "int8" | "bigint" | "bigserial" => "bigint",
        "bool" | "boolean" => "boolean",
        "varchar" | "character varying" => "varchar",
        "char" | "character" | "bpchar" => "char",
        "float4" | "real" => "real",
        "float8" | "double precision" => "double precision",
        "decimal" | "numeric" => "numeric",
        "timestamptz" | "timestamp with time zone" => "timestamptz",
        "timestamp" | "timestamp without time zone" => "timestamp",
        "timetz" | "time with time zone" => "timetz",
        "time" | "time without time zone" => "time",
        _ => return lowered,
    };
    canonical.to_string()
}

/// Whether PostgreSQL converts `from` to `to` without a `USING` clause.
pub fn is_auto_castable(from: &str, to: &str) -> bool {
    const TEXT: &[&str] = &["text", "varchar", "char"];
    const NUMERIC: &[&str] = &["smallint", "integer", "bigint", "numeric"];

    let from = postgres_canonical_type(from);
    let to = postgres_canonical_type(to);
    if from == to {
        return true;
    }
    if TEXT.contains(&from.as_str()) && TEXT.contains(&to.as_str()) {
        return true;
    }
    match (
        NUMERIC.iter().position(|t| *t == from),
        NUMERIC.iter().position(|t| *t == to),
    ) {
        (Some(f), Some(t)) => f < t,
        _ => false,
    }
}

/// The PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect {
    renderer: PostgresRenderer,
}

impl PostgresDialect {
    /// Create the dialect.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn renderer(&self) -> &dyn Renders {
        &self.renderer
    }

    fn default_schema(&self) -> &str {
        "public"
    }

    fn canonical_type(&self, sql_type: &str) -> String {
        postgres_canonical_type(sql_type)
    }
}
