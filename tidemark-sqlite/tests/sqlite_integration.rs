//! Integration tests running migrations against real SQLite databases.

use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tidemark_migrate::{
    AutoMigrateConfig, AutoMigrator, Database, DiffOperation, Inspector, LedgerTables, Migration,
    MigrationError, Migrations, Migrator, MigratorConfig,
};
use tidemark_schema::{ColumnSpec, ForeignKeySpec, ModelSet, ModelSpec};
use tidemark_sqlite::{SqliteConfig, SqliteDatabase};

type Log = Arc<Mutex<Vec<String>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn memory_db() -> Arc<SqliteDatabase> {
    Arc::new(SqliteDatabase::open_in_memory().await.unwrap())
}

fn logged(name: &str, log: &Log, up: &'static str, down: &'static str) -> Migration {
    let up_log = log.clone();
    let down_log = log.clone();
    Migration::new(name)
        .up_fn(move |_| {
            let log = up_log.clone();
            async move {
                log.lock().push(up.to_string());
                Ok(())
            }
            .boxed()
        })
        .down_fn(move |_| {
            let log = down_log.clone();
            async move {
                log.lock().push(down.to_string());
                Ok(())
            }
            .boxed()
        })
}

fn users_and_posts() -> ModelSet {
    ModelSet::new()
        .model(
            ModelSpec::new("users")
                .column(ColumnSpec::new("id", "bigint").primary_key().identity())
                .column(ColumnSpec::new("email", "varchar").length(200).unique()),
        )
        .model(
            ModelSpec::new("posts")
                .column(ColumnSpec::new("id", "bigint").primary_key().identity())
                .column(ColumnSpec::new("author_id", "bigint").not_null())
                .foreign_key(ForeignKeySpec::new(["author_id"], "users", ["id"])),
        )
}

fn people(table: &str, name_column: &str) -> ModelSet {
    ModelSet::new().model(
        ModelSpec::new(table)
            .column(ColumnSpec::new("id", "bigint").primary_key().identity())
            .column(ColumnSpec::new(name_column, "text")),
    )
}

/// Test that the ledger survives reopening a file database.
#[tokio::test]
async fn test_migrate_and_rollback_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let log = Log::default();
    let migrations = || {
        Migrations::try_from_iter([
            logged("20060102150405", &log, "up1", "down1"),
            logged("20060102160405", &log, "up2", "down2"),
        ])
        .unwrap()
    };

    {
        let db = Arc::new(SqliteDatabase::open(SqliteConfig::file(&path)).await.unwrap());
        let migrator = Migrator::new(db, migrations(), MigratorConfig::default()).unwrap();
        let group = migrator.migrate().await.unwrap();
        assert_eq!(group.id, 1);
        assert_eq!(group.names(), vec!["20060102150405", "20060102160405"]);
    }
    assert_eq!(*log.lock(), vec!["up1", "up2"]);
    log.lock().clear();

    let db = Arc::new(SqliteDatabase::open(SqliteConfig::file(&path)).await.unwrap());
    let migrator = Migrator::new(db, migrations(), MigratorConfig::default()).unwrap();
    assert!(migrator.status().await.unwrap().is_up_to_date());

    let group = migrator.rollback().await.unwrap();
    assert_eq!(group.id, 1);
    assert_eq!(group.names(), vec!["20060102160405", "20060102150405"]);
    assert_eq!(*log.lock(), vec!["down2", "down1"]);
    assert!(migrator.applied().await.unwrap().is_empty());
}

/// Test that a failing migration keeps the records of those before it.
#[tokio::test]
async fn test_failure_persists_applied_records() {
    let db = memory_db().await;
    let migrations = Migrations::try_from_iter([
        Migration::sql(
            "0001_things",
            vec!["CREATE TABLE things (id INTEGER);".to_string()],
            vec!["DROP TABLE things;".to_string()],
        ),
        Migration::new("0002_noop"),
        Migration::new("0003_broken").up_fn(|db| {
            async move { db.execute("CREATE TABLE things (id INTEGER);").await }.boxed()
        }),
    ])
    .unwrap();
    let migrator = Migrator::new(db.clone(), migrations, MigratorConfig::default()).unwrap();

    let err = migrator.migrate().await.unwrap_err();
    match &err {
        MigrationError::MigrationFailed { name, group, .. } => {
            assert_eq!(name, "0003_broken");
            assert_eq!(group.names(), vec!["0001_things", "0002_noop"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.root_message().contains("already exists"), "{}", err.root_message());

    let names: Vec<String> = migrator
        .applied()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["0001_things", "0002_noop"]);

    let group = migrator.rollback().await.unwrap();
    assert_eq!(group.id, 1);
    assert_eq!(group.names(), vec!["0002_noop", "0001_things"]);
    assert!(migrator.applied().await.unwrap().is_empty());

    let tables: i64 = db
        .connection()
        .call(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'things'",
                [],
                |row| row.get(0),
            )?)
        })
        .await
        .unwrap();
    assert_eq!(tables, 0);
}

/// Test that a held lock blocks a second runner.
#[tokio::test]
async fn test_lock_held() {
    let db = memory_db().await;
    let ledger = db.ledger(&LedgerTables::default());
    ledger.init().await.unwrap();
    assert!(ledger.try_lock().await.unwrap());
    assert!(!ledger.try_lock().await.unwrap());

    let migrator = Migrator::new(
        db.clone(),
        Migrations::new().with(Migration::new("0001")).unwrap(),
        MigratorConfig::default(),
    )
    .unwrap();
    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(err, MigrationError::LockHeld { ref table } if table == "tidemark_migrations"));

    ledger.unlock().await.unwrap();
    assert_eq!(migrator.migrate().await.unwrap().names(), vec!["0001"]);
}

/// Test that reset clears the ledger and runs nothing.
#[tokio::test]
async fn test_reset() {
    let db = memory_db().await;
    let log = Log::default();
    let migrator = Migrator::new(
        db,
        Migrations::new().with(logged("0001", &log, "up1", "down1")).unwrap(),
        MigratorConfig::default(),
    )
    .unwrap();

    migrator.migrate().await.unwrap();
    migrator.reset().await.unwrap();

    assert!(migrator.applied().await.unwrap().is_empty());
    assert_eq!(*log.lock(), vec!["up1"]);
}

/// Test that inspection sees raw SQL tables but hides the ledger.
#[tokio::test]
async fn test_inspect_after_sql_migrations() {
    let db = memory_db().await;
    let migrations = Migrations::new()
        .with(Migration::sql(
            "0001_init",
            vec![
                "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, email TEXT UNIQUE);"
                    .to_string(),
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER NOT NULL REFERENCES users (id));"
                    .to_string(),
            ],
            vec!["DROP TABLE posts;".to_string(), "DROP TABLE users;".to_string()],
        ))
        .unwrap();
    Migrator::new(db.clone(), migrations, MigratorConfig::default())
        .unwrap()
        .migrate()
        .await
        .unwrap();

    let state = Inspector::new(db, Vec::new()).unwrap().inspect().await.unwrap();

    assert_eq!(state.table_names().collect::<Vec<_>>(), vec!["posts", "users"]);
    assert!(state.table("users").unwrap().column("id").unwrap().identity);
    assert_eq!(state.foreign_keys.len(), 1);
    let fk = state.foreign_keys.keys().next().unwrap();
    assert_eq!(fk.from.table, "posts");
    assert_eq!(fk.to.columns, vec!["id"]);
}

/// Test that auto-migration converges and rolls back cleanly.
#[tokio::test]
async fn test_auto_migrate_round_trip() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let db = memory_db().await;
    let config = AutoMigrateConfig::new().migrations_dir(dir.path());
    let auto = AutoMigrator::new(db.clone(), users_and_posts(), config).unwrap();

    let group = auto.migrate().await.unwrap();
    assert_eq!(group.id, 1);
    assert_eq!(group.migrations.len(), 1);

    let plan = auto.plan().await.unwrap();
    assert!(plan.is_empty(), "{}", plan.diff.summary());
    assert_eq!(plan.current.foreign_keys.len(), 1);
    assert!(auto.migrate().await.unwrap().is_zero());

    let rolled_back = auto.rollback().await.unwrap();
    assert_eq!(rolled_back.names(), group.names());
    assert!(auto.inspector().inspect().await.unwrap().is_empty());
}

/// Test that renamed tables and columns are renamed in place.
#[tokio::test]
async fn test_rename_detection() {
    let dir = tempfile::tempdir().unwrap();
    let db = memory_db().await;
    Migrator::new(
        db.clone(),
        Migrations::new()
            .with(Migration::sql(
                "0001_people",
                vec![
                    "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL, name TEXT);"
                        .to_string(),
                    "INSERT INTO people (name) VALUES ('ada');".to_string(),
                ],
                vec!["DROP TABLE people;".to_string()],
            ))
            .unwrap(),
        MigratorConfig::default(),
    )
    .unwrap()
    .migrate()
    .await
    .unwrap();

    let config = AutoMigrateConfig::new().migrations_dir(dir.path());

    let auto = AutoMigrator::new(db.clone(), people("persons", "name"), config.clone()).unwrap();
    let plan = auto.plan().await.unwrap();
    assert_eq!(
        plan.diff.up,
        vec![DiffOperation::RenameTable {
            from: "people".to_string(),
            to: "persons".to_string(),
        }]
    );
    assert_eq!(auto.migrate().await.unwrap().id, 2);

    let auto = AutoMigrator::new(db.clone(), people("persons", "full_name"), config).unwrap();
    let plan = auto.plan().await.unwrap();
    assert_eq!(
        plan.diff.up,
        vec![DiffOperation::RenameColumn {
            table: "persons".to_string(),
            from: "name".to_string(),
            to: "full_name".to_string(),
        }]
    );
    assert_eq!(auto.migrate().await.unwrap().id, 3);

    let name: String = db
        .connection()
        .call(|conn| Ok(conn.query_row("SELECT full_name FROM persons", [], |row| row.get(0))?))
        .await
        .unwrap();
    assert_eq!(name, "ada");
}

/// Test that changes SQLite cannot alter in place are refused.
#[tokio::test]
async fn test_unsupported_alter() {
    let dir = tempfile::tempdir().unwrap();
    let db = memory_db().await;
    let config = AutoMigrateConfig::new().migrations_dir(dir.path());
    AutoMigrator::new(db.clone(), people("people", "name"), config.clone())
        .unwrap()
        .migrate()
        .await
        .unwrap();

    let stricter = ModelSet::new().model(
        ModelSpec::new("people")
            .column(ColumnSpec::new("id", "bigint").primary_key().identity())
            .column(ColumnSpec::new("name", "text").not_null()),
    );
    let err = AutoMigrator::new(db, stricter, config)
        .unwrap()
        .create_sql_migrations()
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::Unsupported { ref dialect, .. } if dialect == "sqlite"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}
