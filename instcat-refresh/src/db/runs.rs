//! Cycle run history

use chrono::{DateTime, Utc};
use instcat_common::{time, Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::CycleRun;

pub async fn insert_run(pool: &SqlitePool, run: &CycleRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cycle_runs
            (run_id, tier, started_at, completed_at, attempted, succeeded, failed, cancelled)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(&run.tier)
    .bind(time::to_db(run.started_at))
    .bind(run.completed_at.map(time::to_db))
    .bind(run.attempted as i64)
    .bind(run.succeeded as i64)
    .bind(run.failed as i64)
    .bind(run.cancelled)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the final counts of a run
pub async fn complete_run(
    pool: &SqlitePool,
    run_id: Uuid,
    completed_at: DateTime<Utc>,
    attempted: u64,
    succeeded: u64,
    failed: u64,
    cancelled: bool,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE cycle_runs
        SET completed_at = ?, attempted = ?, succeeded = ?, failed = ?, cancelled = ?
        WHERE run_id = ?
        "#,
    )
    .bind(time::to_db(completed_at))
    .bind(attempted as i64)
    .bind(succeeded as i64)
    .bind(failed as i64)
    .bind(cancelled)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Cycle run {}", run_id)));
    }
    Ok(())
}

/// Most recent runs, newest first
pub async fn get_run_history(pool: &SqlitePool, limit: u32) -> Result<Vec<CycleRun>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, tier, started_at, completed_at, attempted, succeeded, failed, cancelled
        FROM cycle_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<CycleRun> {
            let run_id: String = row.get("run_id");
            let started_at: String = row.get("started_at");
            let attempted: i64 = row.get("attempted");
            let succeeded: i64 = row.get("succeeded");
            let failed: i64 = row.get("failed");
            Ok(CycleRun {
                run_id: Uuid::parse_str(&run_id)
                    .map_err(|e| Error::Internal(format!("Bad run id '{}': {}", run_id, e)))?,
                tier: row.get("tier"),
                started_at: time::from_db(&started_at)?,
                completed_at: time::from_db_opt(row.get("completed_at"))?,
                attempted: attempted as u64,
                succeeded: succeeded as u64,
                failed: failed as u64,
                cancelled: row.get("cancelled"),
            })
        })
        .collect()
}
