//! Schema inspection through SQLite's pragma table functions.

use std::collections::BTreeMap;

use tidemark_migrate::{Inspects, MigrateResult};
use tidemark_schema::{
    Column, ColumnRef, ForeignKey, PrimaryKey, SchemaState, Table, UniqueConstraint,
    normalize_default,
};
use tracing::{debug, instrument};

use crate::database::SqliteDatabase;
use crate::error::{SqliteError, SqliteResult};
use crate::render::type_affinity;

/// Catalog rows for one table, gathered on the connection thread.
#[derive(Debug)]
struct RawTable {
    name: String,
    sql: String,
    columns: Vec<RawColumn>,
    unique_indexes: Vec<RawIndex>,
    foreign_keys: Vec<RawForeignKey>,
}

#[derive(Debug)]
struct RawColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    default: Option<String>,
    pk_position: i64,
}

#[derive(Debug)]
struct RawIndex {
    name: String,
    origin: String,
    columns: Vec<String>,
}

#[derive(Debug)]
struct RawForeignKey {
    referenced_table: String,
    from: Vec<String>,
    to: Vec<Option<String>>,
}

fn read_catalog(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<RawTable>> {
    let mut tables_stmt = conn.prepare(
        "SELECT name, COALESCE(sql, '') FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = tables_stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns_stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let mut indexes_stmt = conn.prepare(
        "SELECT name, origin FROM pragma_index_list(?1) \
         WHERE \"unique\" = 1 AND origin != 'pk' AND partial = 0 ORDER BY name",
    )?;
    let mut index_columns_stmt =
        conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut fks_stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;

    let mut raw = Vec::with_capacity(tables.len());
    for (name, sql) in tables {
        let columns = columns_stmt
            .query_map([&name], |row| {
                Ok(RawColumn {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                    not_null: row.get(2)?,
                    default: row.get(3)?,
                    pk_position: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let index_names = indexes_stmt
            .query_map([&name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut unique_indexes = Vec::with_capacity(index_names.len());
        for (index, origin) in index_names {
            let columns = index_columns_stmt
                .query_map([&index], |row| row.get::<_, Option<String>>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            // Expression indexes have no column names.
            if columns.iter().any(Option::is_none) {
                continue;
            }
            unique_indexes.push(RawIndex {
                name: index,
                origin,
                columns: columns.into_iter().flatten().collect(),
            });
        }

        let mut foreign_keys: BTreeMap<i64, RawForeignKey> = BTreeMap::new();
        let rows = fks_stmt
            .query_map([&name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, referenced_table, from, to) in rows {
            let fk = foreign_keys.entry(id).or_insert_with(|| RawForeignKey {
                referenced_table,
                from: Vec::new(),
                to: Vec::new(),
            });
            fk.from.push(from);
            fk.to.push(to);
        }

        raw.push(RawTable {
            name,
            sql,
            columns,
            unique_indexes,
            foreign_keys: foreign_keys.into_values().collect(),
        });
    }

    Ok(raw)
}

/// Split a declared type such as `varchar(200)` into its name and length.
///
/// Types with several parameters (`decimal(10,2)`) are kept whole. An empty
/// declaration is reported as `blob`, the affinity SQLite gives it.
pub(crate) fn parse_declared_type(declared: &str) -> (String, Option<u32>) {
    let declared = declared.trim();
    if declared.is_empty() {
        return ("blob".to_string(), None);
    }

    if let Some((name, rest)) = declared.split_once('(') {
        if let Some(length) = rest
            .strip_suffix(')')
            .and_then(|arg| arg.trim().parse::<u32>().ok())
        {
            return (name.trim().to_string(), Some(length));
        }
    }

    (declared.to_string(), None)
}

fn build_table(raw: &RawTable, schema: &str) -> Table {
    let mut pk_columns: Vec<&RawColumn> = raw.columns.iter().filter(|c| c.pk_position > 0).collect();
    pk_columns.sort_by_key(|c| c.pk_position);

    let autoincrement = raw.sql.to_ascii_uppercase().contains("AUTOINCREMENT");
    let identity_column = match pk_columns.as_slice() {
        [only] if autoincrement && type_affinity(&only.declared_type) == "integer" => {
            Some(only.name.as_str())
        }
        _ => None,
    };

    let mut table = Table::new(&raw.name).with_schema(schema);
    for raw_column in &raw.columns {
        let (sql_type, length) = parse_declared_type(&raw_column.declared_type);
        let mut column = Column::new(&raw_column.name, sql_type).nullable(!raw_column.not_null);
        column.length = length;
        column.default = normalize_default(raw_column.default.clone());
        column.identity = identity_column == Some(raw_column.name.as_str());
        table = table.with_column(column);
    }

    if !pk_columns.is_empty() {
        table.primary_key = Some(PrimaryKey::new(pk_columns.iter().map(|c| c.name.as_str())));
    }

    for index in &raw.unique_indexes {
        // Automatic indexes backing inline UNIQUE clauses carry generated names.
        let unique = if index.origin == "u" && index.name.starts_with("sqlite_autoindex_") {
            UniqueConstraint::new(index.columns.iter().cloned())
        } else {
            UniqueConstraint::named(&index.name, index.columns.iter().cloned())
        };
        table = table.with_unique(unique);
    }

    table
}

/// Assemble catalog rows into a schema state.
fn build_state(raw: Vec<RawTable>, schema: &str) -> SqliteResult<SchemaState> {
    let mut state = SchemaState::new();
    for table in &raw {
        state.add_table(build_table(table, schema));
    }

    for table in &raw {
        for fk in &table.foreign_keys {
            let to_columns = if fk.to.iter().all(Option::is_some) {
                fk.to.iter().flatten().cloned().collect::<Vec<_>>()
            } else {
                // `REFERENCES t` without columns targets the primary key.
                state
                    .table(&fk.referenced_table)
                    .and_then(|t| t.primary_key.as_ref())
                    .map(|pk| pk.columns.clone())
                    .ok_or_else(|| {
                        SqliteError::inspect(format!(
                            "foreign key on `{}` references `{}` which has no primary key",
                            table.name, fk.referenced_table
                        ))
                    })?
            };

            let foreign_key = ForeignKey::new(
                ColumnRef::new(&table.name, fk.from.iter().cloned()),
                ColumnRef::new(&fk.referenced_table, to_columns),
            );
            // SQLite does not expose constraint names.
            state.foreign_keys.insert(foreign_key, String::new());
        }
    }

    Ok(state)
}

#[async_trait::async_trait]
impl Inspects for SqliteDatabase {
    #[instrument(skip(self))]
    async fn inspect_schema(&self) -> MigrateResult<SchemaState> {
        let raw = self
            .connection()
            .call(|conn| Ok(read_catalog(conn)?))
            .await
            .map_err(SqliteError::from)?;

        debug!(tables = raw.len(), "Read SQLite catalog");
        Ok(build_state(raw, "main")?)
    }
}
