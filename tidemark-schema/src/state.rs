//! Structural description of a relational schema.
//!
//! A [`SchemaState`] is what both sides of a schema comparison look like: the
//! inspector produces one from a live database, and the model builder produces
//! one from declarations. Values are plain data and treated as immutable once
//! built; the differ never mutates its inputs.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

/// The structure of a database schema: tables plus named foreign keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaState {
    /// Tables keyed by name.
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
    /// Foreign keys mapped to their constraint name (empty when unnamed).
    #[serde(default, with = "foreign_key_list")]
    pub foreign_keys: BTreeMap<ForeignKey, String>,
}

impl SchemaState {
    /// Create an empty schema state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, replacing any table with the same name.
    pub fn with_table(mut self, table: Table) -> Self {
        self.add_table(table);
        self
    }

    /// Add a foreign key with an optional constraint name.
    pub fn with_foreign_key(mut self, foreign_key: ForeignKey, name: impl Into<String>) -> Self {
        self.foreign_keys.insert(foreign_key, name.into());
        self
    }

    /// Insert a table keyed by its name.
    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Whether the state has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Foreign keys declared on a table.
    pub fn foreign_keys_from<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a ForeignKey, &'a String)> + 'a {
        self.foreign_keys
            .iter()
            .filter(move |(fk, _)| fk.from.table == table)
    }

    /// Return a copy without the given tables and any foreign key touching them.
    pub fn without_tables(&self, excluded: &[String]) -> SchemaState {
        let is_excluded = |name: &str| excluded.iter().any(|e| e == name);

        SchemaState {
            tables: self
                .tables
                .iter()
                .filter(|(name, _)| !is_excluded(name))
                .map(|(name, table)| (name.clone(), table.clone()))
                .collect(),
            foreign_keys: self
                .foreign_keys
                .iter()
                .filter(|(fk, _)| !is_excluded(&fk.from.table) && !is_excluded(&fk.to.table))
                .map(|(fk, name)| (fk.clone(), name.clone()))
                .collect(),
        }
    }

    /// Check the structural invariants of the state.
    ///
    /// Table and column keys must match the names they map to, and every
    /// primary key, unique constraint and foreign key must reference existing
    /// columns.
    pub fn validate(&self) -> SchemaResult<()> {
        for (key, table) in &self.tables {
            if key != &table.name {
                return Err(SchemaError::invalid_table(
                    key,
                    format!("keyed as `{}` but named `{}`", key, table.name),
                ));
            }
            table.validate()?;
        }

        for fk in self.foreign_keys.keys() {
            self.validate_foreign_key(fk)?;
        }

        Ok(())
    }

    fn validate_foreign_key(&self, fk: &ForeignKey) -> SchemaResult<()> {
        let owner = &fk.from.table;

        if fk.from.columns.is_empty() || fk.from.columns.len() != fk.to.columns.len() {
            return Err(SchemaError::invalid_foreign_key(
                owner,
                format!(
                    "{} referencing columns but {} referenced columns",
                    fk.from.columns.len(),
                    fk.to.columns.len()
                ),
            ));
        }

        for side in [&fk.from, &fk.to] {
            let table = self.table(&side.table).ok_or_else(|| {
                SchemaError::invalid_foreign_key(owner, format!("unknown table `{}`", side.table))
            })?;
            for column in &side.columns {
                if table.column(column).is_none() {
                    return Err(SchemaError::invalid_foreign_key(
                        owner,
                        format!("unknown column `{}.{}`", side.table, column),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Structural equality that ignores column order and generated names.
    ///
    /// Unique constraints are compared by column set and foreign keys by their
    /// column pairs, because the database may assign names the declarations
    /// never mention.
    pub fn is_equivalent(&self, other: &SchemaState) -> bool {
        if self.tables.len() != other.tables.len() {
            return false;
        }

        let tables_match = self.tables.iter().all(|(name, table)| {
            other
                .table(name)
                .is_some_and(|theirs| table.is_equivalent(theirs))
        });

        tables_match
            && self.foreign_keys.keys().collect::<BTreeSet<_>>()
                == other.foreign_keys.keys().collect::<BTreeSet<_>>()
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Schema namespace (e.g. "public" or "main").
    #[serde(default)]
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns keyed by name, in declaration order.
    #[serde(default)]
    pub columns: IndexMap<String, Column>,
    /// Primary key, if any.
    #[serde(default)]
    pub primary_key: Option<PrimaryKey>,
    /// Unique constraints.
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: String::new(),
            name: name.into(),
            columns: IndexMap::new(),
            primary_key: None,
            unique_constraints: Vec::new(),
        }
    }

    /// Set the schema namespace.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Add a column.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Set the primary key columns.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = Some(PrimaryKey::new(columns));
        self
    }

    /// Add a unique constraint.
    pub fn with_unique(mut self, unique: UniqueConstraint) -> Self {
        self.unique_constraints.push(unique);
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Whether the column is part of the primary key.
    pub fn is_primary_key_column(&self, name: &str) -> bool {
        self.primary_key
            .as_ref()
            .is_some_and(|pk| pk.columns.iter().any(|c| c == name))
    }

    fn validate(&self) -> SchemaResult<()> {
        for (key, column) in &self.columns {
            if key != &column.name {
                return Err(SchemaError::invalid_column(
                    &self.name,
                    key,
                    format!("keyed as `{}` but named `{}`", key, column.name),
                ));
            }
            if column.sql_type.trim().is_empty() {
                return Err(SchemaError::invalid_column(
                    &self.name,
                    key,
                    "missing SQL type",
                ));
            }
        }

        if let Some(pk) = &self.primary_key {
            if pk.columns.is_empty() {
                return Err(SchemaError::invalid_table(
                    &self.name,
                    "primary key has no columns",
                ));
            }
            self.check_columns("primary key", &pk.columns)?;
            if pk.column_set().len() != pk.columns.len() {
                return Err(SchemaError::invalid_table(
                    &self.name,
                    "primary key repeats a column",
                ));
            }
        }

        for unique in &self.unique_constraints {
            if unique.columns.is_empty() {
                return Err(SchemaError::invalid_table(
                    &self.name,
                    "unique constraint has no columns",
                ));
            }
            self.check_columns("unique constraint", &unique.columns)?;
        }

        Ok(())
    }

    fn check_columns(&self, what: &str, columns: &[String]) -> SchemaResult<()> {
        match columns.iter().find(|c| !self.columns.contains_key(*c)) {
            Some(missing) => Err(SchemaError::invalid_column(
                &self.name,
                missing,
                format!("referenced by {} but not defined", what),
            )),
            None => Ok(()),
        }
    }

    fn is_equivalent(&self, other: &Table) -> bool {
        if self.columns.len() != other.columns.len() {
            return false;
        }

        let columns_match = self.columns.iter().all(|(name, column)| {
            other.column(name).is_some_and(|theirs| {
                column.same_definition(theirs, |a, b| a.eq_ignore_ascii_case(b))
            })
        });

        let pk_match = match (&self.primary_key, &other.primary_key) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_columns(b),
            _ => false,
        };

        let mut ours: Vec<_> = self
            .unique_constraints
            .iter()
            .map(UniqueConstraint::column_set)
            .collect();
        let mut theirs: Vec<_> = other
            .unique_constraints
            .iter()
            .map(UniqueConstraint::column_set)
            .collect();
        ours.sort();
        theirs.sort();

        columns_match && pk_match && ours == theirs
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// SQL type name without length (e.g. "varchar", "bigint").
    pub sql_type: String,
    /// Whether NULL values are allowed.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column is an identity / auto-increment column.
    #[serde(default)]
    pub identity: bool,
    /// Default value expression.
    #[serde(default)]
    pub default: Option<String>,
    /// Fixed length (e.g. character length).
    #[serde(default)]
    pub length: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Column {
    /// Create a nullable column without default.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            identity: false,
            default: None,
            length: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set nullability.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark the column as identity.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Set the default expression. Empty expressions mean "no default".
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = normalize_default(Some(expr.into()));
        self
    }

    /// Set the fixed length.
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// The SQL type including its length, e.g. `varchar(200)`.
    pub fn full_type(&self) -> String {
        match self.length {
            Some(len) => format!("{}({})", self.sql_type, len),
            None => self.sql_type.clone(),
        }
    }

    /// Whether two columns have the same definition, ignoring their names.
    ///
    /// `same_type` decides whether two SQL type names denote the same type.
    pub fn same_definition(&self, other: &Column, same_type: impl Fn(&str, &str) -> bool) -> bool {
        same_type(&self.sql_type, &other.sql_type)
            && self.length == other.length
            && self.nullable == other.nullable
            && self.identity == other.identity
            && self.default == other.default
    }
}

/// Normalize a default expression: trimmed, empty means none.
pub fn normalize_default(expr: Option<String>) -> Option<String> {
    expr.map(|e| e.trim().to_string()).filter(|e| !e.is_empty())
}

/// A primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Optional constraint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Key columns in definition order.
    pub columns: Vec<String>,
}

impl PrimaryKey {
    /// Create an unnamed primary key.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Key columns as a set.
    pub fn column_set(&self) -> BTreeSet<&str> {
        self.columns.iter().map(String::as_str).collect()
    }

    /// Whether both keys cover the same columns, in any order.
    pub fn same_columns(&self, other: &PrimaryKey) -> bool {
        self.column_set() == other.column_set()
    }

    /// The constraint name, falling back to `<table>_pkey`.
    pub fn name_or_default(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_pkey", table),
        }
    }
}

/// A group of columns in a table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table name.
    pub table: String,
    /// Column names.
    pub columns: Vec<String>,
}

impl ColumnRef {
    /// Create a column reference.
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this reference includes the given column.
    pub fn contains(&self, table: &str, column: &str) -> bool {
        self.table == table && self.columns.iter().any(|c| c == column)
    }
}

/// A foreign key relationship, identified by its column pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing side.
    pub from: ColumnRef,
    /// Referenced side.
    pub to: ColumnRef,
}

impl ForeignKey {
    /// Create a foreign key.
    pub fn new(from: ColumnRef, to: ColumnRef) -> Self {
        Self { from, to }
    }

    /// Whether either side of the key lives in the given table.
    pub fn touches_table(&self, table: &str) -> bool {
        self.from.table == table || self.to.table == table
    }

    /// Whether either side of the key includes the given column.
    pub fn touches_column(&self, table: &str, column: &str) -> bool {
        self.from.contains(table, column) || self.to.contains(table, column)
    }

    /// Conventional constraint name: `<table>_<columns>_fkey`.
    pub fn default_name(&self) -> String {
        format!("{}_{}_fkey", self.from.table, self.from.columns.join("_"))
    }
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name; unnamed constraints compare by column set only.
    #[serde(default)]
    pub name: Option<String>,
    /// Constrained columns.
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    /// Create an unnamed constraint.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a named constraint.
    pub fn named<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: Some(name.into()),
            ..Self::new(columns)
        }
    }

    /// Constrained columns as an ordered set.
    pub fn column_set(&self) -> BTreeSet<String> {
        self.columns.iter().cloned().collect()
    }

    /// The constraint name, falling back to `<table>_<columns>_key`.
    pub fn name_or_default(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}_key", table, self.columns.join("_")),
        }
    }
}

mod foreign_key_list {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ForeignKey;

    #[derive(Serialize, Deserialize)]
    struct NamedForeignKey {
        #[serde(flatten)]
        foreign_key: ForeignKey,
        #[serde(default)]
        name: String,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<ForeignKey, String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter().map(|(fk, name)| NamedForeignKey {
            foreign_key: fk.clone(),
            name: name.clone(),
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ForeignKey, String>, D::Error> {
        let list = Vec::<NamedForeignKey>::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|entry| (entry.foreign_key, entry.name))
            .collect())
    }
}
