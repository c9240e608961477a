//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates every table the
//! refresh pipeline persists. All statements are idempotent, so calling
//! [`init_database`] on an existing database is safe.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets readers of field_metadata proceed while workers commit
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;

    Ok(pool)
}

/// Create all pipeline tables and indexes
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_schedule_entries_table(pool).await?;
    create_entity_sources_table(pool).await?;
    create_source_hashes_table(pool).await?;
    create_field_metadata_table(pool).await?;
    create_audit_log_table(pool).await?;
    create_daily_statistics_table(pool).await?;
    create_extraction_diagnostics_table(pool).await?;
    create_cycle_runs_table(pool).await?;

    info!("Database tables initialized");
    Ok(())
}

pub async fn create_schedule_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedule_entries (
            entity_id TEXT PRIMARY KEY,
            tier TEXT NOT NULL CHECK (tier IN ('hot', 'cold')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'in_progress', 'done', 'failed', 'dead_letter')),
            next_due_at TEXT NOT NULL,
            last_attempt_at TEXT,
            last_success_at TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_schedule_due ON schedule_entries (tier, status, next_due_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_entity_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_sources (
            entity_id TEXT NOT NULL REFERENCES schedule_entries(entity_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            url TEXT NOT NULL,
            source_class TEXT,
            PRIMARY KEY (entity_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_source_hashes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_hashes (
            entity_id TEXT NOT NULL,
            source_url TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            http_status INTEGER NOT NULL,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, source_url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_field_metadata_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_metadata (
            entity_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            current_value TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            source_url TEXT NOT NULL,
            method TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (entity_id, field_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_audit_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT NOT NULL,
            confidence REAL NOT NULL,
            source_url TEXT NOT NULL,
            method TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_entity_field ON audit_log (entity_id, field_name, id)",
    )
    .execute(pool)
    .await?;

    // Audit rows are append-only
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS audit_log_no_update
        BEFORE UPDATE ON audit_log
        BEGIN
            SELECT RAISE(ABORT, 'audit_log is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_daily_statistics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_statistics (
            date TEXT PRIMARY KEY,
            attempted INTEGER NOT NULL DEFAULT 0,
            succeeded INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            confidence_sum REAL NOT NULL DEFAULT 0.0,
            confidence_count INTEGER NOT NULL DEFAULT 0,
            avg_confidence REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_extraction_diagnostics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extraction_diagnostics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            field_name TEXT,
            kind TEXT NOT NULL,
            raw_value TEXT,
            confidence REAL,
            source_url TEXT,
            detail TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_diagnostics_entity ON extraction_diagnostics (entity_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_cycle_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cycle_runs (
            run_id TEXT PRIMARY KEY,
            tier TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            attempted INTEGER NOT NULL DEFAULT 0,
            succeeded INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            cancelled INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
