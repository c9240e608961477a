//! Tests for database initialization

use instcat_common::db::init::init_database;
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sub").join("instcat.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_all_pipeline_tables_created() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("instcat.db")).await.unwrap();

    let tables = table_names(&pool).await;
    for expected in [
        "audit_log",
        "cycle_runs",
        "daily_statistics",
        "entity_sources",
        "extraction_diagnostics",
        "field_metadata",
        "schedule_entries",
        "source_hashes",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("instcat.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO daily_statistics (date, attempted, succeeded, failed) VALUES ('2026-01-01', 3, 2, 1)",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    // Re-running initialization keeps existing rows
    let pool2 = init_database(&db_path).await.unwrap();
    let attempted: i64 =
        sqlx::query_scalar("SELECT attempted FROM daily_statistics WHERE date = '2026-01-01'")
            .fetch_one(&pool2)
            .await
            .unwrap();
    assert_eq!(attempted, 3);
}

#[tokio::test]
async fn test_audit_log_rejects_updates() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("instcat.db")).await.unwrap();

    sqlx::query(
        r#"
        INSERT INTO audit_log (entity_id, field_name, old_value, new_value, confidence, source_url, method, timestamp)
        VALUES ('u1', 'acceptance_rate', NULL, '0.1', 0.9, 'https://a.edu', 'meta_tag', '2026-01-01T00:00:00.000Z')
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = sqlx::query("UPDATE audit_log SET new_value = '0.2'")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "audit_log must be append-only");
}

#[tokio::test]
async fn test_field_metadata_confidence_constraint() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("instcat.db")).await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO field_metadata (entity_id, field_name, current_value, confidence, source_url, method, last_updated)
        VALUES ('u1', 'acceptance_rate', '0.1', 1.5, 'https://a.edu', 'meta_tag', '2026-01-01T00:00:00.000Z')
        "#,
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}
