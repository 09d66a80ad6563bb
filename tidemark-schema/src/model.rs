//! Model declarations and the target schema builder.
//!
//! Models are declared either programmatically or in a TOML file:
//!
//! ```toml
//! [[model]]
//! table = "things"
//!
//! [[model.column]]
//! name = "id"
//! type = "bigint"
//! primary_key = true
//! identity = true
//!
//! [[model.column]]
//! name = "owner_id"
//! type = "bigint"
//! not_null = true
//!
//! [[model.foreign_key]]
//! columns = ["owner_id"]
//! references = "owners"
//! referenced_columns = ["id"]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchemaError, SchemaResult};
use crate::state::{
    Column, ColumnRef, ForeignKey, PrimaryKey, SchemaState, Table, UniqueConstraint,
    normalize_default,
};

/// Anything that can produce the target schema state.
pub trait BuildSchema: Send + Sync {
    /// Build the schema state; tables without an explicit namespace get
    /// `default_schema`.
    fn build_schema(&self, default_schema: &str) -> SchemaResult<SchemaState>;

    /// Number of declared models.
    fn model_count(&self) -> usize;
}

/// An ordered set of model declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSet {
    /// Declared models.
    #[serde(default, rename = "model")]
    pub models: Vec<ModelSpec>,
}

impl ModelSet {
    /// Create an empty model set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model.
    pub fn model(mut self, model: ModelSpec) -> Self {
        self.models.push(model);
        self
    }

    /// Load models from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse models from a TOML string.
    pub fn from_toml_str(content: &str) -> SchemaResult<Self> {
        toml::from_str(content).map_err(|e| SchemaError::TomlError { source: e })
    }

    /// Whether no models are declared.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl BuildSchema for ModelSet {
    fn build_schema(&self, default_schema: &str) -> SchemaResult<SchemaState> {
        let mut state = SchemaState::new();

        for model in &self.models {
            if state.table(&model.table).is_some() {
                return Err(SchemaError::duplicate("table", &model.table));
            }
            state.add_table(model.build_table(default_schema)?);

            for fk in &model.foreign_keys {
                let key = ForeignKey::new(
                    ColumnRef::new(&model.table, fk.columns.iter().cloned()),
                    ColumnRef::new(&fk.references, fk.referenced_columns.iter().cloned()),
                );
                if state.foreign_keys.contains_key(&key) {
                    return Err(SchemaError::duplicate("foreign key", key.default_name()));
                }
                state
                    .foreign_keys
                    .insert(key, fk.name.clone().unwrap_or_default());
            }
        }

        state.validate()?;
        debug!(
            tables = state.tables.len(),
            foreign_keys = state.foreign_keys.len(),
            "Built target schema"
        );

        Ok(state)
    }

    fn model_count(&self) -> usize {
        self.models.len()
    }
}

impl BuildSchema for SchemaState {
    fn build_schema(&self, _default_schema: &str) -> SchemaResult<SchemaState> {
        self.validate()?;
        Ok(self.clone())
    }

    fn model_count(&self) -> usize {
        self.tables.len()
    }
}

/// A single table declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    /// Table name.
    pub table: String,
    /// Schema namespace; defaults to the dialect's default schema.
    #[serde(default)]
    pub schema: Option<String>,
    /// Columns in declaration order.
    #[serde(default, rename = "column")]
    pub columns: Vec<ColumnSpec>,
    /// Table-level primary key.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Table-level unique constraints.
    #[serde(default, rename = "unique")]
    pub uniques: Vec<UniqueSpec>,
    /// Outgoing foreign keys.
    #[serde(default, rename = "foreign_key")]
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl ModelSpec {
    /// Create a model for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            uniques: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Set the schema namespace.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the table-level primary key.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a unique constraint.
    pub fn unique(mut self, unique: UniqueSpec) -> Self {
        self.uniques.push(unique);
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    fn resolve_primary_key(&self) -> SchemaResult<Vec<String>> {
        let flagged: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();

        if self.primary_key.is_empty() {
            return Ok(flagged);
        }
        if flagged.is_empty() {
            return Ok(self.primary_key.clone());
        }

        let declared_set: BTreeSet<&String> = self.primary_key.iter().collect();
        let flagged_set: BTreeSet<&String> = flagged.iter().collect();
        if declared_set != flagged_set {
            return Err(SchemaError::ConflictingPrimaryKey {
                table: self.table.clone(),
                declared: self.primary_key.join(", "),
                flagged: flagged.join(", "),
            });
        }

        Ok(self.primary_key.clone())
    }

    fn build_table(&self, default_schema: &str) -> SchemaResult<Table> {
        let pk_columns = self.resolve_primary_key()?;
        let mut columns = IndexMap::with_capacity(self.columns.len());

        for spec in &self.columns {
            if columns.contains_key(&spec.name) {
                return Err(SchemaError::duplicate(
                    "column",
                    format!("{}.{}", self.table, spec.name),
                ));
            }
            let in_pk = pk_columns.contains(&spec.name);
            columns.insert(
                spec.name.clone(),
                Column {
                    name: spec.name.clone(),
                    sql_type: spec.sql_type.clone(),
                    nullable: !(spec.not_null || in_pk),
                    identity: spec.identity,
                    default: normalize_default(spec.default.clone()),
                    length: spec.length,
                },
            );
        }

        let mut unique_constraints: Vec<UniqueConstraint> = self
            .columns
            .iter()
            .filter(|c| c.unique)
            .map(|c| UniqueConstraint::new([c.name.clone()]))
            .collect();

        // Columns sharing a group name form one composite constraint.
        let mut groups: IndexMap<&str, Vec<String>> = IndexMap::new();
        for spec in &self.columns {
            if let Some(group) = &spec.unique_group {
                groups.entry(group).or_default().push(spec.name.clone());
            }
        }
        unique_constraints.extend(
            groups
                .into_iter()
                .map(|(name, cols)| UniqueConstraint::named(name, cols)),
        );
        unique_constraints.extend(self.uniques.iter().map(|u| UniqueConstraint {
            name: u.name.clone(),
            columns: u.columns.clone(),
        }));

        Ok(Table {
            schema: self
                .schema
                .clone()
                .unwrap_or_else(|| default_schema.to_string()),
            name: self.table.clone(),
            columns,
            primary_key: (!pk_columns.is_empty()).then(|| PrimaryKey::new(pk_columns)),
            unique_constraints,
        })
    }
}

/// A column declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// SQL type name.
    #[serde(rename = "type")]
    pub sql_type: String,
    /// Fixed length.
    #[serde(default)]
    pub length: Option<u32>,
    /// Reject NULL values.
    #[serde(default)]
    pub not_null: bool,
    /// Part of the primary key (implies NOT NULL).
    #[serde(default)]
    pub primary_key: bool,
    /// Identity / auto-increment column.
    #[serde(default)]
    pub identity: bool,
    /// Default expression.
    #[serde(default)]
    pub default: Option<String>,
    /// Single-column unique constraint.
    #[serde(default)]
    pub unique: bool,
    /// Name of a composite unique constraint this column belongs to.
    #[serde(default)]
    pub unique_group: Option<String>,
}

impl ColumnSpec {
    /// Create a nullable column declaration.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            length: None,
            not_null: false,
            primary_key: false,
            identity: false,
            default: None,
            unique: false,
            unique_group: None,
        }
    }

    /// Set the fixed length.
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Reject NULL values.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Mark as primary key column.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark as identity column.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Set the default expression.
    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Add a single-column unique constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Join a named composite unique constraint.
    pub fn unique_group(mut self, group: impl Into<String>) -> Self {
        self.unique_group = Some(group.into());
        self
    }
}

/// A table-level unique constraint declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniqueSpec {
    /// Optional constraint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Constrained columns.
    pub columns: Vec<String>,
}

impl UniqueSpec {
    /// Create an unnamed unique constraint.
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

    /// Name the constraint.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A foreign key declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeySpec {
    /// Referencing columns in this table.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// Optional constraint name.
    #[serde(default)]
    pub name: Option<String>,
}

impl ForeignKeySpec {
    /// Create a foreign key declaration.
    pub fn new<I, S, J, T>(columns: I, references: impl Into<String>, referenced_columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            references: references.into(),
            referenced_columns: referenced_columns.into_iter().map(Into::into).collect(),
            name: None,
        }
    }

    /// Name the constraint.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
