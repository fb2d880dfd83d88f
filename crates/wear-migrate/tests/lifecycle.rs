//! Migration lifecycle against an in-memory SQLite database.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use wear_migrate::{Action, MigrateError, MigrationLog, Migrator, Registry, SchemaMigration};
use wear_orm::{Adapter, Criteria, Order, Q};

const V1: &str = "2024-01-10:09:00:00";
const V2: &str = "2024-02-20:18:30:00";

async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create test pool")
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(
        V1,
        "CREATE TABLE customer (id INTEGER PRIMARY KEY, name TEXT);",
        "DROP TABLE customer;",
    );
    registry.register(
        V2,
        "CREATE TABLE invoice (id INTEGER PRIMARY KEY, total REAL);\n\
         INSERT INTO invoice (id, total) VALUES (1, 9.5);",
        "DROP TABLE invoice;",
    );
    registry.register("default", "CREATE TABLE settings (k TEXT);", "");
    registry
}

async fn ledger(pool: &SqlitePool) -> Vec<String> {
    let rows: Vec<SchemaMigration> = Adapter::new(pool.clone())
        .select(&Criteria::new().order_by("version", Order::Asc))
        .await
        .unwrap();
    rows.into_iter().map(|m| m.version).collect()
}

async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
    match Adapter::new(pool.clone())
        .exec_script(&format!("SELECT COUNT(*) FROM {table};"))
        .await
    {
        Ok(_) => true,
        Err(e) if e.is_table_missing() => false,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let pool = create_test_pool().await;
    let migrator = Migrator::new(pool.clone(), registry());

    migrator.init_schema(false).await.unwrap();
    migrator.init_schema(false).await.unwrap();

    assert!(ledger(&pool).await.is_empty());
    assert!(!table_exists(&pool, "settings").await);

    let inits = Adapter::new(pool.clone())
        .count::<MigrationLog>(&Criteria::new().filter(Q::eq("action", Action::Init.as_str())))
        .await
        .unwrap();
    assert_eq!(inits, 2);
}

#[tokio::test]
async fn test_init_applies_default_schema_on_request() {
    let pool = create_test_pool().await;
    let migrator = Migrator::new(pool.clone(), registry());

    migrator.init_schema(true).await.unwrap();
    assert_eq!(ledger(&pool).await, ["0000-00-00:00:00:00"]);
    assert!(table_exists(&pool, "settings").await);

    // not a fresh ledger anymore
    migrator.init_schema(true).await.unwrap();
    assert_eq!(ledger(&pool).await.len(), 1);
}

#[tokio::test]
async fn test_full_lifecycle() {
    let pool = create_test_pool().await;
    let migrator = Migrator::new(pool.clone(), registry());
    migrator.init_schema(false).await.unwrap();

    let applied = migrator.update_schema(false).await.unwrap();
    assert_eq!(applied, [V1, V2]);
    assert_eq!(ledger(&pool).await, [V1, V2]);
    assert!(table_exists(&pool, "invoice").await);
    assert!(!table_exists(&pool, "settings").await);

    // nothing left to do
    assert!(migrator.update_schema(false).await.unwrap().is_empty());

    migrator.rollback(V2).await.unwrap();
    assert_eq!(ledger(&pool).await, [V1]);
    assert!(!table_exists(&pool, "invoice").await);

    migrator.execute_migration(V2).await.unwrap();
    assert_eq!(ledger(&pool).await, [V1, V2]);
    assert!(table_exists(&pool, "invoice").await);

    // already applied: running the insert again would hit the primary key
    migrator.execute_migration(V2).await.unwrap();
    assert_eq!(ledger(&pool).await, [V1, V2]);

    let rolled = migrator.rollback_latest().await.unwrap();
    assert_eq!(rolled, Some((V2.to_string(), V1.to_string())));
    assert_eq!(ledger(&pool).await, [V1]);

    migrator.reset().await.unwrap();
    assert!(ledger(&pool).await.is_empty());
    // reset keeps the data
    assert!(table_exists(&pool, "customer").await);

    assert_eq!(migrator.rollback_latest().await.unwrap(), None);

    let status = migrator.status().await.unwrap();
    assert!(status.applied.is_empty());
    assert_eq!(status.logs[0].action, "reset");
    assert_eq!(status.logs[0].message, "Reset all data");
    let report = status.to_string();
    assert!(report.contains("No migrations so far"));
}

#[tokio::test]
async fn test_update_logs_installed_versions() {
    let pool = create_test_pool().await;
    let migrator = Migrator::new(pool.clone(), registry());
    migrator.init_schema(false).await.unwrap();
    migrator.update_schema(true).await.unwrap();

    assert_eq!(ledger(&pool).await.len(), 3);
    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied, ["0000-00-00:00:00:00", V1, V2]);

    let update = &status.logs[0];
    assert_eq!(update.action, "update");
    assert_eq!(update.version, V2);
    assert_eq!(
        update.message,
        format!("Migration(s) (0000-00-00:00:00:00, {V1}, {V2}) have been installed")
    );
    assert!(update.success);
}

#[tokio::test]
async fn test_failed_migration_leaves_no_trace() {
    let pool = create_test_pool().await;
    let mut registry = Registry::new();
    registry.register(V1, "CREATE TABLE customer (id INTEGER PRIMARY KEY);", "");
    registry.register(
        V2,
        "CREATE TABLE invoice (id INTEGER PRIMARY KEY);\nINSERT INTO nowhere VALUES (1);",
        "",
    );
    let migrator = Migrator::new(pool.clone(), registry);
    migrator.init_schema(false).await.unwrap();

    let err = migrator.update_schema(false).await.unwrap_err();
    assert!(matches!(&err, MigrateError::Apply { version, .. } if version == V2));

    // the version before the failure stays applied
    assert_eq!(ledger(&pool).await, [V1]);
    assert!(table_exists(&pool, "customer").await);
    assert!(!table_exists(&pool, "invoice").await);
}

#[tokio::test]
async fn test_rollback_errors() {
    let pool = create_test_pool().await;
    let migrator = Migrator::new(pool.clone(), registry());
    migrator.init_schema(true).await.unwrap();

    assert!(matches!(
        migrator.rollback("default").await,
        Err(MigrateError::MissingDownSql(v)) if v == "0000-00-00:00:00:00"
    ));
    assert!(matches!(
        migrator.rollback("2030-01-01:00:00:00").await,
        Err(MigrateError::MigrationNotFound(_))
    ));
    assert!(matches!(
        migrator.execute_migration("2030-01-01:00:00:00").await,
        Err(MigrateError::MigrationNotFound(_))
    ));
    assert_eq!(ledger(&pool).await.len(), 1);
}

#[tokio::test]
async fn test_missing_forward_sql() {
    let pool = create_test_pool().await;
    let mut registry = Registry::new();
    registry.register(V1, "  \n", "DROP TABLE customer;");
    let migrator = Migrator::new(pool, registry);
    migrator.init_schema(false).await.unwrap();

    assert!(matches!(
        migrator.update_schema(false).await,
        Err(MigrateError::MissingUpSql(v)) if v == V1
    ));
    assert!(matches!(
        migrator.execute_migration(V1).await,
        Err(MigrateError::MissingUpSql(_))
    ));
}
