//! Integration tests for the schema differ.
//!
//! Every diff is checked by applying it to an in-memory schema: `up` must
//! reach the target and `down` must restore the original.

use pretty_assertions::assert_eq;
use tidemark_migrate::{
    Dialect, DiffOperation, DiffOptions, Differ, ForeignKeyNamer, MigrationError,
    PostgresDialect, RenamePolicy, SchemaDiff,
};
use tidemark_schema::{Column, ColumnRef, ForeignKey, SchemaState, Table, UniqueConstraint};

fn diff_with(current: &SchemaState, target: &SchemaState, options: DiffOptions) -> SchemaDiff {
    let dialect = PostgresDialect::new();
    let diff = Differ::new(&dialect, options)
        .diff(current, target)
        .expect("diff succeeds");

    let mut migrated = current.clone();
    for op in &diff.up {
        op.apply_to(&mut migrated).expect("up applies");
    }
    assert!(
        migrated.is_equivalent(target),
        "up does not reach the target:\n{:#?}",
        diff.up
    );

    let mut reverted = migrated;
    for op in &diff.down {
        op.apply_to(&mut reverted).expect("down applies");
    }
    assert!(
        reverted.is_equivalent(current),
        "down does not restore the current schema:\n{:#?}",
        diff.down
    );

    diff
}

fn diff(current: &SchemaState, target: &SchemaState) -> SchemaDiff {
    diff_with(current, target, DiffOptions::default())
}

fn try_diff(
    current: &SchemaState,
    target: &SchemaState,
    options: DiffOptions,
) -> Result<SchemaDiff, MigrationError> {
    Differ::new(&PostgresDialect::new(), options).diff(current, target)
}

fn kinds(diff: &SchemaDiff) -> Vec<&'static str> {
    diff.up.iter().map(DiffOperation::kind).collect()
}

fn users() -> Table {
    Table::new("users")
        .with_column(Column::new("id", "integer").not_null())
        .with_column(Column::new("email", "varchar").length(200))
        .with_primary_key(["id"])
        .with_unique(UniqueConstraint::new(["email"]))
}

fn posts() -> Table {
    Table::new("posts")
        .with_column(Column::new("id", "integer").not_null())
        .with_column(Column::new("author_id", "integer"))
        .with_primary_key(["id"])
}

fn author_fk() -> ForeignKey {
    ForeignKey::new(
        ColumnRef::new("posts", ["author_id"]),
        ColumnRef::new("users", ["id"]),
    )
}

fn blog() -> SchemaState {
    SchemaState::new()
        .with_table(users())
        .with_table(posts())
        .with_foreign_key(author_fk(), "posts_author_id_fkey")
}

fn people(name: &str) -> Table {
    Table::new(name)
        .with_column(Column::new("id", "bigint").not_null())
        .with_column(Column::new("name", "text"))
        .with_primary_key(["id"])
}

/// Building a schema from nothing creates tables before foreign keys.
#[test]
fn test_create_from_empty() {
    let target = blog();
    let diff = diff(&SchemaState::new(), &target);

    assert_eq!(
        kinds(&diff),
        vec!["create table", "create table", "add foreign key"]
    );
    assert_eq!(
        kinds(&SchemaDiff {
            up: diff.down.clone(),
            down: Vec::new()
        }),
        vec!["drop foreign key", "drop table", "drop table"]
    );
}

/// Identical schemas produce nothing, also after migrating.
#[test]
fn test_no_changes_and_idempotence() {
    assert!(diff(&blog(), &blog()).is_empty());

    let first = diff(&SchemaState::new(), &blog());
    let mut migrated = SchemaState::new();
    for op in &first.up {
        op.apply_to(&mut migrated).unwrap();
    }
    let second = diff(&migrated, &blog());
    assert!(second.is_empty(), "{}", second.summary());
}

/// Equivalent type spellings are not a change.
#[test]
fn test_type_aliases_are_equivalent() {
    let current = SchemaState::new().with_table(
        Table::new("t")
            .with_column(Column::new("a", "int4"))
            .with_column(Column::new("b", "character varying").length(10)),
    );
    let target = SchemaState::new().with_table(
        Table::new("t")
            .with_column(Column::new("a", "INTEGER"))
            .with_column(Column::new("b", "varchar").length(10)),
    );
    let diff = try_diff(&current, &target, DiffOptions::default()).unwrap();
    assert!(diff.is_empty(), "{}", diff.summary());
}

/// A table with the same columns under a new name is renamed.
#[test]
fn test_table_rename_detected() {
    let current = SchemaState::new().with_table(people("people"));
    let target = SchemaState::new().with_table(people("persons"));

    let diff = diff(&current, &target);
    assert_eq!(
        diff.up,
        vec![DiffOperation::RenameTable {
            from: "people".into(),
            to: "persons".into()
        }]
    );

    let dialect = PostgresDialect::new();
    let sql = dialect.renderer().render_all(&diff.up).expect("renders");
    assert_eq!(sql, vec!["ALTER TABLE \"people\" RENAME TO \"persons\";"]);
}

/// A table renamed together with its key column is renamed, not recreated.
#[test]
fn test_renamed_column_in_renamed_table() {
    let table = |name: &str, key: &str| {
        Table::new(name)
            .with_column(Column::new(key, "bigint").not_null())
            .with_primary_key([key])
    };
    let current = SchemaState::new().with_table(table("original", "id"));
    let target = SchemaState::new().with_table(table("renamed", "count"));

    let diff = diff(&current, &target);
    assert_eq!(kinds(&diff), vec!["rename table", "rename column"]);
    assert_eq!(
        diff.up[1],
        DiffOperation::RenameColumn {
            table: "renamed".into(),
            from: "id".into(),
            to: "count".into()
        }
    );
}

/// Unnamed constraints of a renamed table are dropped by their old names.
#[test]
fn test_renamed_table_drops_constraints_by_old_name() {
    let dialect = PostgresDialect::new();
    let base = |name: &str| {
        people(name).with_column(Column::new("tenant_id", "bigint").not_null())
    };

    let current = SchemaState::new().with_table(base("people"));
    let target = SchemaState::new()
        .with_table(base("persons").with_primary_key(["id", "tenant_id"]));
    let diff = diff(&current, &target);
    assert_eq!(
        dialect.renderer().render_all(&diff.up).expect("renders"),
        vec![
            "ALTER TABLE \"people\" RENAME TO \"persons\";",
            "ALTER TABLE \"persons\" DROP CONSTRAINT \"people_pkey\";",
            "ALTER TABLE \"persons\" ADD CONSTRAINT \"persons_pkey\" PRIMARY KEY (\"id\", \"tenant_id\");",
        ]
    );

    let current = SchemaState::new()
        .with_table(base("people").with_unique(UniqueConstraint::new(["tenant_id"])));
    let target = SchemaState::new().with_table(base("persons"));
    let diff = self::diff(&current, &target);
    assert_eq!(
        dialect.renderer().render_all(&diff.up).expect("renders"),
        vec![
            "ALTER TABLE \"people\" RENAME TO \"persons\";",
            "ALTER TABLE \"persons\" DROP CONSTRAINT \"people_tenant_id_key\";",
        ]
    );
}

/// Below the threshold a changed table is dropped and created.
#[test]
fn test_rename_threshold() {
    let current = SchemaState::new().with_table(people("people"));
    let target = SchemaState::new()
        .with_table(people("persons").with_column(Column::new("age", "integer")));

    let strict = diff(&current, &target);
    assert_eq!(kinds(&strict), vec!["drop table", "create table"]);

    let relaxed = diff_with(
        &current,
        &target,
        DiffOptions {
            rename_threshold: 0.9,
            ..Default::default()
        },
    );
    assert_eq!(kinds(&relaxed), vec!["rename table", "add column"]);
}

/// Two equally good table candidates are ambiguous.
#[test]
fn test_ambiguous_table_rename() {
    let table = |name: &str| Table::new(name).with_column(Column::new("x", "text"));
    let current = SchemaState::new().with_table(table("a")).with_table(table("b"));
    let target = SchemaState::new().with_table(table("c"));

    let err = try_diff(&current, &target, DiffOptions::default()).unwrap_err();
    match err {
        MigrationError::AmbiguousRename {
            kind,
            subject,
            candidates,
        } => {
            assert_eq!(kind, "table");
            assert_eq!(subject, "c");
            assert_eq!(candidates, vec!["a", "b"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let diff = diff_with(
        &current,
        &target,
        DiffOptions {
            rename_policy: RenamePolicy::FirstByName,
            ..Default::default()
        },
    );
    assert_eq!(kinds(&diff), vec!["rename table", "drop table"]);
}

/// A dropped and an added column with the same definition are a rename.
#[test]
fn test_column_rename_detected() {
    let current = SchemaState::new()
        .with_table(people("people").with_column(Column::new("surname", "text")));
    let target = SchemaState::new()
        .with_table(people("people").with_column(Column::new("last_name", "text")));

    let diff = diff(&current, &target);
    assert_eq!(
        diff.up,
        vec![DiffOperation::RenameColumn {
            table: "people".into(),
            from: "surname".into(),
            to: "last_name".into()
        }]
    );
}

/// Ambiguous column renames fail strictly and resolve by name otherwise.
#[test]
fn test_ambiguous_column_rename() {
    let t = |a: &str, b: &str| {
        SchemaState::new().with_table(
            Table::new("t")
                .with_column(Column::new(a, "text"))
                .with_column(Column::new(b, "text")),
        )
    };
    let current = t("a", "b");
    let target = t("c", "d");

    let err = try_diff(&current, &target, DiffOptions::default()).unwrap_err();
    assert!(
        matches!(err, MigrationError::AmbiguousRename { ref subject, .. } if subject == "t.c"),
        "{err}"
    );

    let diff = diff_with(
        &current,
        &target,
        DiffOptions {
            rename_policy: RenamePolicy::FirstByName,
            ..Default::default()
        },
    );
    let renames: Vec<(String, String)> = diff
        .up
        .iter()
        .filter_map(|op| match op {
            DiffOperation::RenameColumn { from, to, .. } => Some((from.clone(), to.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        renames,
        vec![("a".into(), "c".into()), ("b".into(), "d".into())]
    );
}

/// Hints override detection.
#[test]
fn test_rename_hints() {
    let current = SchemaState::new().with_table(
        Table::new("t")
            .with_column(Column::new("a", "text"))
            .with_column(Column::new("b", "text")),
    );
    let target = SchemaState::new().with_table(
        Table::new("t")
            .with_column(Column::new("c", "text"))
            .with_column(Column::new("d", "text")),
    );

    let mut options = DiffOptions::default();
    options
        .renames
        .columns
        .entry("t".into())
        .or_default()
        .extend([("a".to_string(), "d".to_string()), ("b".to_string(), "c".to_string())]);

    let diff = diff_with(&current, &target, options);
    assert_eq!(kinds(&diff), vec!["rename column", "rename column"]);
    assert!(diff.up.contains(&DiffOperation::RenameColumn {
        table: "t".into(),
        from: "a".into(),
        to: "d".into()
    }));
}

/// Each differing attribute gets its own alter.
#[test]
fn test_column_attribute_alters() {
    let current = SchemaState::new().with_table(
        Table::new("t")
            .with_column(Column::new("n", "integer"))
            .with_column(Column::new("s", "text").default_value("'x'")),
    );
    let target = SchemaState::new().with_table(
        Table::new("t")
            .with_column(Column::new("n", "bigint").not_null().identity())
            .with_column(Column::new("s", "text")),
    );

    let diff = diff(&current, &target);
    let mut found = kinds(&diff);
    found.sort_unstable();
    assert_eq!(
        found,
        vec![
            "alter column default",
            "alter column identity",
            "alter column nullability",
            "alter column type",
        ]
    );
}

/// Foreign keys on retyped columns are dropped and re-added around the change.
#[test]
fn test_foreign_key_rebuilt_around_type_change() {
    let mut target = blog();
    for table in ["users", "posts"] {
        let t = target.tables.get_mut(table).unwrap();
        for column in t.columns.values_mut() {
            if column.name.ends_with("id") {
                column.sql_type = "bigint".into();
            }
        }
    }

    let diff = diff(&blog(), &target);
    assert_eq!(
        kinds(&diff),
        vec![
            "drop foreign key",
            "alter column type",
            "alter column type",
            "alter column type",
            "add foreign key"
        ]
    );
    assert_eq!(
        diff.up.last(),
        Some(&DiffOperation::AddForeignKey {
            foreign_key: author_fk(),
            name: "posts_author_id_fkey".into()
        })
    );
}

/// A renamed referenced table keeps the foreign key; renaming it is opt-in.
#[test]
fn test_foreign_key_follows_table_rename() {
    let pets = Table::new("pets")
        .with_column(Column::new("id", "bigint").not_null())
        .with_column(Column::new("owner_id", "bigint"))
        .with_primary_key(["id"]);
    let fk = |owner: &str| {
        ForeignKey::new(
            ColumnRef::new("pets", ["owner_id"]),
            ColumnRef::new(owner, ["id"]),
        )
    };
    let current = SchemaState::new()
        .with_table(people("people"))
        .with_table(pets.clone())
        .with_foreign_key(fk("people"), "pets_owner_id_fkey");
    let target = SchemaState::new()
        .with_table(people("persons"))
        .with_table(pets)
        .with_foreign_key(fk("persons"), "");

    let plain = diff(&current, &target);
    assert_eq!(kinds(&plain), vec!["rename table"]);

    let renamed = diff_with(
        &current,
        &target,
        DiffOptions {
            rename_fk: true,
            fk_namer: Some(ForeignKeyNamer::new(|fk| {
                format!("fk_{}_{}", fk.from.table, fk.to.table)
            })),
            ..Default::default()
        },
    );
    assert_eq!(
        renamed.up,
        vec![
            DiffOperation::RenameTable {
                from: "people".into(),
                to: "persons".into()
            },
            DiffOperation::RenameForeignKey {
                foreign_key: fk("persons"),
                from: "pets_owner_id_fkey".into(),
                to: "fk_pets_persons".into()
            },
        ]
    );
}

/// Changing the primary key drops and re-adds it.
#[test]
fn test_primary_key_change() {
    let current = SchemaState::new().with_table(
        people("people").with_column(Column::new("tenant_id", "bigint").not_null()),
    );
    let target = SchemaState::new().with_table(
        people("people")
            .with_column(Column::new("tenant_id", "bigint").not_null())
            .with_primary_key(["id", "tenant_id"]),
    );

    let diff = diff(&current, &target);
    assert_eq!(kinds(&diff), vec!["drop primary key", "add primary key"]);
}

/// Unique constraints match by name first, then by columns.
#[test]
fn test_unique_constraint_changes() {
    let current = SchemaState::new().with_table(
        people("people")
            .with_column(Column::new("email", "text"))
            .with_unique(UniqueConstraint::named("people_contact_key", ["email"])),
    );
    let target = SchemaState::new().with_table(
        people("people")
            .with_column(Column::new("email", "text"))
            .with_unique(UniqueConstraint::named(
                "people_contact_key",
                ["email", "name"],
            )),
    );

    let changed = diff(&current, &target);
    assert_eq!(
        kinds(&changed),
        vec!["drop unique constraint", "add unique constraint"]
    );

    let unnamed = SchemaState::new().with_table(
        people("people")
            .with_column(Column::new("email", "text"))
            .with_unique(UniqueConstraint::new(["email"])),
    );
    assert!(diff(&current, &unnamed).is_empty());
}

/// Dropping a referenced table drops the foreign key first.
#[test]
fn test_drop_table_with_foreign_key() {
    let target = SchemaState::new().with_table(users());
    let diff = diff(&blog(), &target);
    assert_eq!(kinds(&diff), vec!["drop foreign key", "drop table"]);
}

/// An invalid target is a schema mismatch.
#[test]
fn test_invalid_target() {
    let target = SchemaState::new()
        .with_table(posts())
        .with_foreign_key(author_fk(), "");

    let err = try_diff(&SchemaState::new(), &target, DiffOptions::default()).unwrap_err();
    assert!(matches!(err, MigrationError::SchemaMismatch { .. }), "{err}");
}
