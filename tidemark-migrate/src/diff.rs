//! Schema diffing for generating migrations.
//!
//! [`Differ::diff`] compares the current schema with the target schema and
//! produces a [`SchemaDiff`]: the ordered operations that turn the current
//! schema into the target (`up`) and the operations that undo them (`down`).
//!
//! Renamed tables and columns are detected heuristically so they are not
//! turned into a drop followed by a create:
//!
//! - a current table missing from the target and a target table missing from
//!   the current schema are a rename candidate when their column definitions
//!   overlap enough (see [`DiffOptions::rename_threshold`]);
//! - a dropped and an added column are a rename candidate when their
//!   definitions are identical and both play the same primary key role.
//!
//! Explicit hints in [`RenameHints`] always win over detection.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tidemark_schema::{
    Column, ColumnRef, ForeignKey, PrimaryKey, SchemaState, Table, UniqueConstraint,
};
use tracing::{debug, trace};

use crate::config::{AutoMigrateConfig, ForeignKeyNamer, RenameHints, RenamePolicy};
use crate::db::Dialect;
use crate::error::{MigrateResult, MigrationError};
use crate::order;

/// Bonus added to a table rename score when both tables share a primary key.
const PRIMARY_KEY_BONUS: f64 = 0.25;

const SCORE_EPSILON: f64 = 1e-9;

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOperation {
    /// Create a table with its columns, primary key and unique constraints.
    CreateTable { table: Table },
    /// Drop a table; the definition is kept so the drop can be reverted.
    DropTable { table: Table },
    /// Rename a table.
    RenameTable { from: String, to: String },
    /// Add a column.
    AddColumn { table: String, column: Column },
    /// Drop a column.
    DropColumn { table: String, column: Column },
    /// Rename a column.
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    /// Change a column's type or length.
    AlterColumnType {
        table: String,
        column: String,
        from: Column,
        to: Column,
    },
    /// Change a column's nullability.
    AlterColumnNullability {
        table: String,
        column: String,
        nullable: bool,
    },
    /// Change a column's default expression.
    AlterColumnDefault {
        table: String,
        column: String,
        from: Option<String>,
        to: Option<String>,
    },
    /// Turn a column into an identity column or back.
    AlterColumnIdentity {
        table: String,
        column: String,
        identity: bool,
    },
    /// Add a primary key.
    AddPrimaryKey {
        table: String,
        primary_key: PrimaryKey,
    },
    /// Drop a primary key.
    DropPrimaryKey {
        table: String,
        primary_key: PrimaryKey,
    },
    /// Add a unique constraint.
    AddUniqueConstraint {
        table: String,
        unique: UniqueConstraint,
    },
    /// Drop a unique constraint.
    DropUniqueConstraint {
        table: String,
        unique: UniqueConstraint,
    },
    /// Add a foreign key.
    AddForeignKey { foreign_key: ForeignKey, name: String },
    /// Drop a foreign key.
    DropForeignKey { foreign_key: ForeignKey, name: String },
    /// Rename a foreign key constraint.
    RenameForeignKey {
        foreign_key: ForeignKey,
        from: String,
        to: String,
    },
}

impl DiffOperation {
    /// The operation that undoes this one.
    pub fn inverse(&self) -> DiffOperation {
        use DiffOperation::*;

        match self.clone() {
            CreateTable { table } => DropTable { table },
            DropTable { table } => CreateTable { table },
            RenameTable { from, to } => RenameTable { from: to, to: from },
            AddColumn { table, column } => DropColumn { table, column },
            DropColumn { table, column } => AddColumn { table, column },
            RenameColumn { table, from, to } => RenameColumn {
                table,
                from: to,
                to: from,
            },
            AlterColumnType {
                table,
                column,
                from,
                to,
            } => AlterColumnType {
                table,
                column,
                from: to,
                to: from,
            },
            AlterColumnNullability {
                table,
                column,
                nullable,
            } => AlterColumnNullability {
                table,
                column,
                nullable: !nullable,
            },
            AlterColumnDefault {
                table,
                column,
                from,
                to,
            } => AlterColumnDefault {
                table,
                column,
                from: to,
                to: from,
            },
            AlterColumnIdentity {
                table,
                column,
                identity,
            } => AlterColumnIdentity {
                table,
                column,
                identity: !identity,
            },
            AddPrimaryKey { table, primary_key } => DropPrimaryKey { table, primary_key },
            DropPrimaryKey { table, primary_key } => AddPrimaryKey { table, primary_key },
            AddUniqueConstraint { table, unique } => DropUniqueConstraint { table, unique },
            DropUniqueConstraint { table, unique } => AddUniqueConstraint { table, unique },
            AddForeignKey { foreign_key, name } => DropForeignKey { foreign_key, name },
            DropForeignKey { foreign_key, name } => AddForeignKey { foreign_key, name },
            RenameForeignKey {
                foreign_key,
                from,
                to,
            } => RenameForeignKey {
                foreign_key,
                from: to,
                to: from,
            },
        }
    }

    /// Short lowercase label, e.g. "add column".
    pub fn kind(&self) -> &'static str {
        use DiffOperation::*;

        match self {
            CreateTable { .. } => "create table",
            DropTable { .. } => "drop table",
            RenameTable { .. } => "rename table",
            AddColumn { .. } => "add column",
            DropColumn { .. } => "drop column",
            RenameColumn { .. } => "rename column",
            AlterColumnType { .. } => "alter column type",
            AlterColumnNullability { .. } => "alter column nullability",
            AlterColumnDefault { .. } => "alter column default",
            AlterColumnIdentity { .. } => "alter column identity",
            AddPrimaryKey { .. } => "add primary key",
            DropPrimaryKey { .. } => "drop primary key",
            AddUniqueConstraint { .. } => "add unique constraint",
            DropUniqueConstraint { .. } => "drop unique constraint",
            AddForeignKey { .. } => "add foreign key",
            DropForeignKey { .. } => "drop foreign key",
            RenameForeignKey { .. } => "rename foreign key",
        }
    }

    /// Apply the operation to an in-memory schema.
    pub fn apply_to(&self, state: &mut SchemaState) -> MigrateResult<()> {
        use DiffOperation::*;

        match self {
            CreateTable { table } => {
                if state.tables.contains_key(&table.name) {
                    return Err(apply_error(self, format!("table `{}` exists", table.name)));
                }
                state.add_table(table.clone());
            }
            DropTable { table } => {
                state
                    .tables
                    .remove(&table.name)
                    .ok_or_else(|| unknown_table(self, &table.name))?;
            }
            RenameTable { from, to } => {
                let mut table = state
                    .tables
                    .remove(from)
                    .ok_or_else(|| unknown_table(self, from))?;
                table.name = to.clone();
                state.add_table(table);
                remap_foreign_keys(state, |r| {
                    if &r.table == from {
                        ColumnRef::new(to.clone(), r.columns.iter().cloned())
                    } else {
                        r.clone()
                    }
                });
            }
            AddColumn { table, column } => {
                let t = table_mut(self, state, table)?;
                t.columns.insert(column.name.clone(), column.clone());
            }
            DropColumn { table, column } => {
                let t = table_mut(self, state, table)?;
                t.columns
                    .shift_remove(&column.name)
                    .ok_or_else(|| apply_error(self, format!("unknown column `{}`", column.name)))?;
            }
            RenameColumn { table, from, to } => {
                let t = table_mut(self, state, table)?;
                rename_column_in_table(t, from, to)
                    .ok_or_else(|| apply_error(self, format!("unknown column `{}`", from)))?;
                remap_foreign_keys(state, |r| {
                    if &r.table == table {
                        ColumnRef::new(
                            table.clone(),
                            r.columns
                                .iter()
                                .map(|c| if c == from { to.clone() } else { c.clone() }),
                        )
                    } else {
                        r.clone()
                    }
                });
            }
            AlterColumnType {
                table, column, to, ..
            } => {
                let col = column_mut(self, state, table, column)?;
                col.sql_type = to.sql_type.clone();
                col.length = to.length;
            }
            AlterColumnNullability {
                table,
                column,
                nullable,
            } => column_mut(self, state, table, column)?.nullable = *nullable,
            AlterColumnDefault {
                table, column, to, ..
            } => column_mut(self, state, table, column)?.default = to.clone(),
            AlterColumnIdentity {
                table,
                column,
                identity,
            } => column_mut(self, state, table, column)?.identity = *identity,
            AddPrimaryKey { table, primary_key } => {
                table_mut(self, state, table)?.primary_key = Some(primary_key.clone());
            }
            DropPrimaryKey { table, .. } => {
                table_mut(self, state, table)?.primary_key = None;
            }
            AddUniqueConstraint { table, unique } => {
                table_mut(self, state, table)?
                    .unique_constraints
                    .push(unique.clone());
            }
            DropUniqueConstraint { table, unique } => {
                let t = table_mut(self, state, table)?;
                let pos = t
                    .unique_constraints
                    .iter()
                    .position(|u| same_unique(u, unique))
                    .ok_or_else(|| apply_error(self, "unknown unique constraint"))?;
                t.unique_constraints.remove(pos);
            }
            AddForeignKey { foreign_key, name } => {
                state.foreign_keys.insert(foreign_key.clone(), name.clone());
            }
            DropForeignKey { foreign_key, .. } => {
                state
                    .foreign_keys
                    .remove(foreign_key)
                    .ok_or_else(|| apply_error(self, "unknown foreign key"))?;
            }
            RenameForeignKey {
                foreign_key, to, ..
            } => {
                let name = state
                    .foreign_keys
                    .get_mut(foreign_key)
                    .ok_or_else(|| apply_error(self, "unknown foreign key"))?;
                *name = to.clone();
            }
        }

        Ok(())
    }
}

fn apply_error(op: &DiffOperation, message: impl std::fmt::Display) -> MigrationError {
    MigrationError::other(format!("cannot apply {}: {}", op.kind(), message))
}

fn unknown_table(op: &DiffOperation, table: &str) -> MigrationError {
    apply_error(op, format!("unknown table `{}`", table))
}

fn table_mut<'s>(
    op: &DiffOperation,
    state: &'s mut SchemaState,
    table: &str,
) -> MigrateResult<&'s mut Table> {
    state
        .tables
        .get_mut(table)
        .ok_or_else(|| unknown_table(op, table))
}

fn column_mut<'s>(
    op: &DiffOperation,
    state: &'s mut SchemaState,
    table: &str,
    column: &str,
) -> MigrateResult<&'s mut Column> {
    table_mut(op, state, table)?
        .columns
        .get_mut(column)
        .ok_or_else(|| apply_error(op, format!("unknown column `{}.{}`", table, column)))
}

fn rename_column_in_table(table: &mut Table, from: &str, to: &str) -> Option<()> {
    let index = table.columns.get_index_of(from)?;
    let columns = std::mem::take(&mut table.columns);
    table.columns = columns
        .into_iter()
        .enumerate()
        .map(|(i, (name, mut column))| {
            if i == index {
                column.name = to.to_string();
                (to.to_string(), column)
            } else {
                (name, column)
            }
        })
        .collect();

    let rename = |c: &mut String| {
        if c.as_str() == from {
            *c = to.to_string();
        }
    };
    if let Some(pk) = &mut table.primary_key {
        pk.columns.iter_mut().for_each(rename);
    }
    for unique in &mut table.unique_constraints {
        unique.columns.iter_mut().for_each(rename);
    }
    Some(())
}

fn remap_foreign_keys(state: &mut SchemaState, f: impl Fn(&ColumnRef) -> ColumnRef) {
    let foreign_keys = std::mem::take(&mut state.foreign_keys);
    state.foreign_keys = foreign_keys
        .into_iter()
        .map(|(fk, name)| (ForeignKey::new(f(&fk.from), f(&fk.to)), name))
        .collect();
}

fn same_unique(a: &UniqueConstraint, b: &UniqueConstraint) -> bool {
    match (&a.name, &b.name) {
        (Some(x), Some(y)) => x == y,
        _ => a.column_set() == b.column_set(),
    }
}

/// A diff between two schemas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Operations turning the current schema into the target.
    pub up: Vec<DiffOperation>,
    /// Operations reverting `up`, in execution order.
    pub down: Vec<DiffOperation>,
}

impl SchemaDiff {
    /// Build a diff from ordered up operations.
    pub fn from_up(up: Vec<DiffOperation>) -> Self {
        let down = up.iter().rev().map(DiffOperation::inverse).collect();
        Self { up, down }
    }

    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for op in &self.up {
            match counts.iter_mut().find(|(kind, _)| *kind == op.kind()) {
                Some((_, n)) => *n += 1,
                None => counts.push((op.kind(), 1)),
            }
        }

        if counts.is_empty() {
            "No changes".to_string()
        } else {
            counts
                .iter()
                .map(|(kind, n)| format!("{}: {}", kind, n))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// Options steering the differ.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Rename foreign keys whose name differs from the expected name.
    pub rename_fk: bool,
    /// Tie-breaking policy for rename candidates.
    pub rename_policy: RenamePolicy,
    /// Minimum table similarity score for a rename.
    ///
    /// The score is the number of shared column definitions (names ignored)
    /// divided by the larger column count, plus 0.25 when both primary keys
    /// are non-empty and made of the same column definitions.
    pub rename_threshold: f64,
    /// Explicit renames.
    pub renames: RenameHints,
    /// Foreign key naming function.
    pub fk_namer: Option<ForeignKeyNamer>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            rename_fk: false,
            rename_policy: RenamePolicy::Strict,
            rename_threshold: 1.0,
            renames: RenameHints::default(),
            fk_namer: None,
        }
    }
}

impl From<&AutoMigrateConfig> for DiffOptions {
    fn from(config: &AutoMigrateConfig) -> Self {
        Self {
            rename_fk: config.rename_fk,
            rename_policy: config.rename_policy,
            rename_threshold: config.rename_threshold,
            renames: config.renames.clone(),
            fk_namer: config.fk_namer.clone(),
        }
    }
}

/// Schema differ.
pub struct Differ<'d> {
    dialect: &'d dyn Dialect,
    options: DiffOptions,
}

#[derive(Debug, Clone)]
struct Candidate {
    score: f64,
    current: String,
    target: String,
}

/// Renames decided so far, used to translate current names into target names.
#[derive(Debug, Default)]
struct Renames {
    tables: BTreeMap<String, String>,
    /// Keyed by target table name.
    columns: BTreeMap<String, BTreeMap<String, String>>,
}

impl Renames {
    fn table<'n>(&'n self, current: &'n str) -> &'n str {
        self.tables.get(current).map(String::as_str).unwrap_or(current)
    }

    fn column_ref(&self, r: &ColumnRef) -> ColumnRef {
        let table = self.table(&r.table);
        let columns = self.columns.get(table);
        ColumnRef::new(
            table,
            r.columns.iter().map(|c| {
                columns
                    .and_then(|cols| cols.get(c))
                    .cloned()
                    .unwrap_or_else(|| c.clone())
            }),
        )
    }

    fn foreign_key(&self, fk: &ForeignKey) -> ForeignKey {
        ForeignKey::new(self.column_ref(&fk.from), self.column_ref(&fk.to))
    }
}

/// Columns whose change forces dependent foreign keys to be rebuilt.
#[derive(Debug, Default)]
struct Rebuilds {
    retyped: BTreeSet<(String, String)>,
    dropped_keys: Vec<(String, BTreeSet<String>)>,
}

impl Rebuilds {
    fn affects(&self, fk: &ForeignKey) -> bool {
        let retyped = [&fk.from, &fk.to].into_iter().any(|side| {
            side.columns
                .iter()
                .any(|c| self.retyped.contains(&(side.table.clone(), c.clone())))
        });
        let referenced: BTreeSet<String> = fk.to.columns.iter().cloned().collect();
        let key_dropped = self
            .dropped_keys
            .iter()
            .any(|(table, columns)| *table == fk.to.table && *columns == referenced);
        retyped || key_dropped
    }
}

impl<'d> Differ<'d> {
    /// Create a differ for a dialect.
    pub fn new(dialect: &'d dyn Dialect, options: DiffOptions) -> Self {
        Self { dialect, options }
    }

    /// Compute the operations turning `current` into `target`.
    pub fn diff(&self, current: &SchemaState, target: &SchemaState) -> MigrateResult<SchemaDiff> {
        target.validate()?;

        let mut ops = Vec::new();
        let mut renames = Renames {
            tables: self.match_tables(current, target)?,
            ..Default::default()
        };
        let renamed_targets: BTreeSet<&String> = renames.tables.values().collect();

        for (from, to) in &renames.tables {
            ops.push(DiffOperation::RenameTable {
                from: from.clone(),
                to: to.clone(),
            });
        }
        for (name, table) in &current.tables {
            if target.table(name).is_none() && !renames.tables.contains_key(name) {
                ops.push(DiffOperation::DropTable {
                    table: table.clone(),
                });
            }
        }
        for (name, table) in &target.tables {
            if current.table(name).is_none() && !renamed_targets.contains(name) {
                ops.push(DiffOperation::CreateTable {
                    table: table.clone(),
                });
            }
        }

        let mut rebuilds = Rebuilds::default();
        for (name, cur) in &current.tables {
            let target_name = renames.table(name).to_string();
            if let Some(tgt) = target.table(&target_name) {
                let column_renames = self.diff_table(cur, tgt, &mut ops, &mut rebuilds)?;
                if !column_renames.is_empty() {
                    renames.columns.insert(target_name, column_renames);
                }
            }
        }

        self.diff_foreign_keys(current, target, &renames, &rebuilds, &mut ops);

        order::order_operations(&mut ops);
        let diff = SchemaDiff::from_up(ops);
        debug!(summary = %diff.summary(), "Computed schema diff");
        Ok(diff)
    }

    fn match_tables(
        &self,
        current: &SchemaState,
        target: &SchemaState,
    ) -> MigrateResult<BTreeMap<String, String>> {
        let mut current_only: BTreeSet<&str> = current
            .table_names()
            .filter(|n| target.table(n).is_none())
            .collect();
        let mut target_only: BTreeSet<&str> = target
            .table_names()
            .filter(|n| current.table(n).is_none())
            .collect();

        let mut renames = BTreeMap::new();
        for (from, to) in &self.options.renames.tables {
            if current_only.contains(from.as_str()) && target_only.contains(to.as_str()) {
                current_only.remove(from.as_str());
                target_only.remove(to.as_str());
                renames.insert(from.clone(), to.clone());
            } else {
                debug!(%from, %to, "Ignoring table rename hint that matches no dropped/created pair");
            }
        }

        let mut candidates = Vec::new();
        for c in &current_only {
            for t in &target_only {
                let (Some(cur), Some(tgt)) = (current.table(c), target.table(t)) else {
                    continue;
                };
                let score = self.table_score(cur, tgt);
                trace!(current = %c, target = %t, score, "Scored table rename candidate");
                if score + SCORE_EPSILON >= self.options.rename_threshold {
                    candidates.push(Candidate {
                        score,
                        current: c.to_string(),
                        target: t.to_string(),
                    });
                }
            }
        }

        renames.extend(self.resolve("table", "", candidates)?);
        Ok(renames)
    }

    fn table_score(&self, current: &Table, target: &Table) -> f64 {
        let max = current.columns.len().max(target.columns.len());
        if max == 0 {
            return 0.0;
        }

        let mut remaining: Vec<ColumnSignature> =
            current.columns.values().map(|c| self.signature(c)).collect();
        let mut shared = 0usize;
        for column in target.columns.values() {
            let signature = self.signature(column);
            if let Some(pos) = remaining.iter().position(|s| *s == signature) {
                remaining.swap_remove(pos);
                shared += 1;
            }
        }

        let mut score = shared as f64 / max as f64;
        if let (Some(a), Some(b)) = (
            self.primary_key_signatures(current),
            self.primary_key_signatures(target),
        ) {
            if a == b {
                score += PRIMARY_KEY_BONUS;
            }
        }
        score
    }

    /// Sorted definitions of the primary key columns, `None` without a key.
    fn primary_key_signatures(&self, table: &Table) -> Option<Vec<ColumnSignature>> {
        let pk = table.primary_key.as_ref().filter(|pk| !pk.columns.is_empty())?;
        let mut signatures = pk
            .columns
            .iter()
            .map(|name| table.column(name).map(|c| self.signature(c)))
            .collect::<Option<Vec<_>>>()?;
        signatures.sort();
        Some(signatures)
    }

    /// Column definition without its name, so renamed columns still match.
    fn signature(&self, column: &Column) -> ColumnSignature {
        ColumnSignature {
            sql_type: self.dialect.canonical_type(&column.sql_type),
            length: column.length,
            nullable: column.nullable,
            identity: column.identity,
            default: column.default.clone(),
        }
    }

    /// Pick rename pairs from scored candidates.
    fn resolve(
        &self,
        kind: &str,
        scope: &str,
        mut candidates: Vec<Candidate>,
    ) -> MigrateResult<Vec<(String, String)>> {
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.target.cmp(&b.target))
                .then_with(|| a.current.cmp(&b.current))
        });

        let same = |a: f64, b: f64| (a - b).abs() < SCORE_EPSILON;
        let mut used_current = BTreeSet::new();
        let mut used_target = BTreeSet::new();
        let mut pairs = Vec::new();

        for pick in &candidates {
            if used_current.contains(&pick.current) || used_target.contains(&pick.target) {
                continue;
            }

            if self.options.rename_policy == RenamePolicy::Strict {
                let rivals_for_target: Vec<String> = candidates
                    .iter()
                    .filter(|c| same(c.score, pick.score) && c.target == pick.target)
                    .filter(|c| !used_current.contains(&c.current))
                    .map(|c| c.current.clone())
                    .collect();
                if rivals_for_target.len() > 1 {
                    return Err(MigrationError::AmbiguousRename {
                        kind: kind.to_string(),
                        subject: format!("{}{}", scope, pick.target),
                        candidates: rivals_for_target,
                    });
                }

                let rivals_for_current: Vec<String> = candidates
                    .iter()
                    .filter(|c| same(c.score, pick.score) && c.current == pick.current)
                    .filter(|c| !used_target.contains(&c.target))
                    .map(|c| c.target.clone())
                    .collect();
                if rivals_for_current.len() > 1 {
                    return Err(MigrationError::AmbiguousRename {
                        kind: kind.to_string(),
                        subject: format!("{}{}", scope, pick.current),
                        candidates: rivals_for_current,
                    });
                }
            }

            debug!(kind, from = %pick.current, to = %pick.target, score = pick.score, "Detected rename");
            used_current.insert(pick.current.clone());
            used_target.insert(pick.target.clone());
            pairs.push((pick.current.clone(), pick.target.clone()));
        }

        Ok(pairs)
    }

    /// Diff one matched table pair. Returns the detected column renames.
    fn diff_table(
        &self,
        cur: &Table,
        tgt: &Table,
        ops: &mut Vec<DiffOperation>,
        rebuilds: &mut Rebuilds,
    ) -> MigrateResult<BTreeMap<String, String>> {
        let table = &tgt.name;
        let column_renames = self.match_columns(cur, tgt)?;

        for (from, to) in &column_renames {
            ops.push(DiffOperation::RenameColumn {
                table: table.clone(),
                from: from.clone(),
                to: to.clone(),
            });
        }

        let renamed_targets: BTreeSet<&String> = column_renames.values().collect();
        for column in cur.columns.values() {
            if tgt.column(&column.name).is_none() && !column_renames.contains_key(&column.name) {
                ops.push(DiffOperation::DropColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }
        for column in tgt.columns.values() {
            if cur.column(&column.name).is_none() && !renamed_targets.contains(&column.name) {
                ops.push(DiffOperation::AddColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }

        let to_target = |name: &str| -> String {
            column_renames
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string())
        };

        for column in cur.columns.values() {
            let target_name = to_target(&column.name);
            if let Some(wanted) = tgt.column(&target_name) {
                self.diff_column(table, column, wanted, ops, rebuilds);
            }
        }

        // Unnamed constraints of a renamed table keep the name derived from
        // the old table name.
        let renamed = cur.name != tgt.name;

        // Primary key, compared in target column names.
        let cur_pk = cur.primary_key.as_ref().map(|pk| PrimaryKey {
            name: if renamed {
                Some(pk.name_or_default(&cur.name))
            } else {
                pk.name.clone()
            },
            columns: pk.columns.iter().map(|c| to_target(c.as_str())).collect(),
        });
        let pk_unchanged = matches!(
            (&cur_pk, &tgt.primary_key),
            (Some(a), Some(b)) if a.same_columns(b)
        );
        if !pk_unchanged {
            if let Some(pk) = cur_pk {
                rebuilds
                    .dropped_keys
                    .push((table.clone(), pk.columns.iter().cloned().collect()));
                ops.push(DiffOperation::DropPrimaryKey {
                    table: table.clone(),
                    primary_key: pk,
                });
            }
            if let Some(pk) = &tgt.primary_key {
                ops.push(DiffOperation::AddPrimaryKey {
                    table: table.clone(),
                    primary_key: pk.clone(),
                });
            }
        }

        // Unique constraints: by name when named on both sides, else by columns.
        let cur_uniques: Vec<UniqueConstraint> = cur
            .unique_constraints
            .iter()
            .map(|u| UniqueConstraint {
                name: if renamed {
                    Some(u.name_or_default(&cur.name))
                } else {
                    u.name.clone()
                },
                columns: u.columns.iter().map(|c| to_target(c.as_str())).collect(),
            })
            .collect();
        let mut matched = vec![false; cur_uniques.len()];

        for wanted in &tgt.unique_constraints {
            let by_name = wanted.name.as_ref().and_then(|name| {
                cur_uniques
                    .iter()
                    .enumerate()
                    .position(|(i, u)| !matched[i] && u.name.as_ref() == Some(name))
            });
            if let Some(i) = by_name {
                matched[i] = true;
                if cur_uniques[i].column_set() != wanted.column_set() {
                    self.drop_unique(table, &cur_uniques[i], ops, rebuilds);
                    ops.push(DiffOperation::AddUniqueConstraint {
                        table: table.clone(),
                        unique: wanted.clone(),
                    });
                }
                continue;
            }

            let by_columns = cur_uniques
                .iter()
                .enumerate()
                .position(|(i, u)| !matched[i] && u.column_set() == wanted.column_set());
            match by_columns {
                Some(i) => matched[i] = true,
                None => ops.push(DiffOperation::AddUniqueConstraint {
                    table: table.clone(),
                    unique: wanted.clone(),
                }),
            }
        }
        for (i, unique) in cur_uniques.iter().enumerate() {
            if !matched[i] {
                self.drop_unique(table, unique, ops, rebuilds);
            }
        }

        Ok(column_renames)
    }

    fn drop_unique(
        &self,
        table: &str,
        unique: &UniqueConstraint,
        ops: &mut Vec<DiffOperation>,
        rebuilds: &mut Rebuilds,
    ) {
        rebuilds
            .dropped_keys
            .push((table.to_string(), unique.column_set()));
        ops.push(DiffOperation::DropUniqueConstraint {
            table: table.to_string(),
            unique: unique.clone(),
        });
    }

    fn match_columns(&self, cur: &Table, tgt: &Table) -> MigrateResult<BTreeMap<String, String>> {
        let mut current_only: Vec<&Column> = cur
            .columns
            .values()
            .filter(|c| tgt.column(&c.name).is_none())
            .collect();
        let mut target_only: Vec<&Column> = tgt
            .columns
            .values()
            .filter(|c| cur.column(&c.name).is_none())
            .collect();

        let mut renames = BTreeMap::new();
        for column in current_only.clone() {
            let Some(hinted) = self.options.renames.column(&tgt.name, &column.name) else {
                continue;
            };
            if let Some(pos) = target_only.iter().position(|t| t.name == hinted) {
                target_only.remove(pos);
                current_only.retain(|c| c.name != column.name);
                renames.insert(column.name.clone(), hinted.to_string());
            }
        }

        let mut candidates = Vec::new();
        for c in &current_only {
            for t in &target_only {
                let same_definition =
                    c.same_definition(t, |a, b| self.dialect.types_equivalent(a, b));
                let same_role = cur.is_primary_key_column(&c.name)
                    == tgt.is_primary_key_column(&t.name);
                if same_definition && same_role {
                    candidates.push(Candidate {
                        score: 1.0,
                        current: c.name.clone(),
                        target: t.name.clone(),
                    });
                }
            }
        }

        renames.extend(self.resolve("column", &format!("{}.", tgt.name), candidates)?);
        Ok(renames)
    }

    fn diff_column(
        &self,
        table: &str,
        cur: &Column,
        tgt: &Column,
        ops: &mut Vec<DiffOperation>,
        rebuilds: &mut Rebuilds,
    ) {
        let name = &tgt.name;

        if !self.dialect.types_equivalent(&cur.sql_type, &tgt.sql_type) || cur.length != tgt.length
        {
            let mut from = cur.clone();
            from.name = name.clone();
            rebuilds.retyped.insert((table.to_string(), name.clone()));
            ops.push(DiffOperation::AlterColumnType {
                table: table.to_string(),
                column: name.clone(),
                from,
                to: tgt.clone(),
            });
        }
        if cur.nullable != tgt.nullable {
            ops.push(DiffOperation::AlterColumnNullability {
                table: table.to_string(),
                column: name.clone(),
                nullable: tgt.nullable,
            });
        }
        if cur.default != tgt.default {
            ops.push(DiffOperation::AlterColumnDefault {
                table: table.to_string(),
                column: name.clone(),
                from: cur.default.clone(),
                to: tgt.default.clone(),
            });
        }
        if cur.identity != tgt.identity {
            ops.push(DiffOperation::AlterColumnIdentity {
                table: table.to_string(),
                column: name.clone(),
                identity: tgt.identity,
            });
        }
    }

    fn diff_foreign_keys(
        &self,
        current: &SchemaState,
        target: &SchemaState,
        renames: &Renames,
        rebuilds: &Rebuilds,
        ops: &mut Vec<DiffOperation>,
    ) {
        let mut matched = BTreeSet::new();

        for (fk, name) in &current.foreign_keys {
            let mapped = renames.foreign_key(fk);
            let Some(declared) = target.foreign_keys.get(&mapped) else {
                ops.push(DiffOperation::DropForeignKey {
                    foreign_key: mapped,
                    name: name.clone(),
                });
                continue;
            };

            matched.insert(mapped.clone());
            let expected = self.expected_fk_name(&mapped, declared);

            if rebuilds.affects(&mapped) {
                let new_name = if self.options.rename_fk || name.is_empty() {
                    expected
                } else {
                    name.clone()
                };
                ops.push(DiffOperation::DropForeignKey {
                    foreign_key: mapped.clone(),
                    name: name.clone(),
                });
                ops.push(DiffOperation::AddForeignKey {
                    foreign_key: mapped,
                    name: new_name,
                });
            } else if self.options.rename_fk && !name.is_empty() && *name != expected {
                ops.push(DiffOperation::RenameForeignKey {
                    foreign_key: mapped,
                    from: name.clone(),
                    to: expected,
                });
            }
        }

        for (fk, declared) in &target.foreign_keys {
            if !matched.contains(fk) {
                ops.push(DiffOperation::AddForeignKey {
                    foreign_key: fk.clone(),
                    name: self.expected_fk_name(fk, declared),
                });
            }
        }
    }

    /// Declared name, else the naming function's result, else the default.
    fn expected_fk_name(&self, fk: &ForeignKey, declared: &str) -> String {
        if !declared.is_empty() {
            return declared.to_string();
        }
        match &self.options.fk_namer {
            Some(namer) => namer.name(fk),
            None => fk.default_name(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ColumnSignature {
    sql_type: String,
    length: Option<u32>,
    nullable: bool,
    identity: bool,
    default: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn users() -> Table {
        Table::new("users")
            .with_column(Column::new("id", "bigint").not_null().identity())
            .with_column(Column::new("email", "varchar").length(200))
            .with_primary_key(["id"])
            .with_unique(UniqueConstraint::new(["email"]))
    }

    fn with_posts(state: SchemaState) -> SchemaState {
        state
            .with_table(
                Table::new("posts")
                    .with_column(Column::new("id", "bigint").not_null())
                    .with_column(Column::new("author_id", "bigint"))
                    .with_primary_key(["id"]),
            )
            .with_foreign_key(
                ForeignKey::new(
                    ColumnRef::new("posts", ["author_id"]),
                    ColumnRef::new("users", ["id"]),
                ),
                "posts_author_id_fkey",
            )
    }

    #[test]
    fn test_inverse_is_involution() {
        let ops = vec![
            DiffOperation::CreateTable { table: users() },
            DiffOperation::RenameColumn {
                table: "users".into(),
                from: "a".into(),
                to: "b".into(),
            },
            DiffOperation::AlterColumnNullability {
                table: "users".into(),
                column: "email".into(),
                nullable: false,
            },
            DiffOperation::AlterColumnDefault {
                table: "users".into(),
                column: "email".into(),
                from: None,
                to: Some("''".into()),
            },
        ];
        for op in ops {
            assert_eq!(op.inverse().inverse(), op);
        }
    }

    #[test]
    fn test_apply_rename_column_updates_constraints() {
        let mut state = with_posts(SchemaState::new().with_table(users()));
        DiffOperation::RenameColumn {
            table: "users".into(),
            from: "id".into(),
            to: "user_id".into(),
        }
        .apply_to(&mut state)
        .unwrap();

        let users = state.table("users").unwrap();
        assert_eq!(
            users.columns.keys().collect::<Vec<_>>(),
            vec!["user_id", "email"]
        );
        assert_eq!(users.primary_key, Some(PrimaryKey::new(["user_id"])));
        let fk = state.foreign_keys.keys().next().unwrap();
        assert_eq!(fk.to, ColumnRef::new("users", ["user_id"]));
    }

    #[test]
    fn test_apply_rename_table_moves_foreign_keys() {
        let mut state = with_posts(SchemaState::new().with_table(users()));
        DiffOperation::RenameTable {
            from: "users".into(),
            to: "accounts".into(),
        }
        .apply_to(&mut state)
        .unwrap();

        assert!(state.table("users").is_none());
        assert_eq!(state.table("accounts").unwrap().name, "accounts");
        let (fk, name) = state.foreign_keys.iter().next().unwrap();
        assert_eq!(fk.to.table, "accounts");
        assert_eq!(name, "posts_author_id_fkey");
    }

    #[test]
    fn test_apply_reports_unknown_objects() {
        let mut state = SchemaState::new();
        let err = DiffOperation::AddColumn {
            table: "nope".into(),
            column: Column::new("a", "int"),
        }
        .apply_to(&mut state)
        .unwrap_err();
        assert!(err.to_string().contains("unknown table `nope`"));
    }

    #[test]
    fn test_summary() {
        let diff = SchemaDiff::from_up(vec![
            DiffOperation::CreateTable { table: users() },
            DiffOperation::AddColumn {
                table: "users".into(),
                column: Column::new("a", "int"),
            },
            DiffOperation::AddColumn {
                table: "users".into(),
                column: Column::new("b", "int"),
            },
        ]);
        assert_eq!(diff.summary(), "create table: 1, add column: 2");
        assert_eq!(SchemaDiff::default().summary(), "No changes");
        assert_eq!(diff.down.len(), 3);
        assert!(matches!(diff.down[2], DiffOperation::DropTable { .. }));
    }

    #[test]
    fn test_rebuilds_match_referenced_keys_exactly() {
        let fk = ForeignKey::new(
            ColumnRef::new("posts", ["author_id"]),
            ColumnRef::new("users", ["id"]),
        );
        let mut rebuilds = Rebuilds::default();
        assert!(!rebuilds.affects(&fk));

        rebuilds
            .dropped_keys
            .push(("users".into(), ["id".to_string(), "email".to_string()].into()));
        assert!(!rebuilds.affects(&fk));

        rebuilds
            .retyped
            .insert(("posts".into(), "author_id".into()));
        assert!(rebuilds.affects(&fk));
    }
}
