//! Daily statistics
//!
//! One row per UTC day, updated with SQL increments so concurrent workers
//! never lose counts.

use chrono::NaiveDate;
use instcat_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::DailyStatistic;

/// Increments applied to one day's row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyDelta {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub confidence_sum: f64,
    pub confidence_count: u64,
}

/// Add `delta` to the row for `date`, creating it if needed
pub async fn increment_daily(pool: &SqlitePool, date: NaiveDate, delta: DailyDelta) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO daily_statistics
            (date, attempted, succeeded, failed, confidence_sum, confidence_count, avg_confidence)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                CASE WHEN ?6 > 0 THEN ?5 / ?6 ELSE NULL END)
        ON CONFLICT(date) DO UPDATE SET
            attempted = attempted + excluded.attempted,
            succeeded = succeeded + excluded.succeeded,
            failed = failed + excluded.failed,
            confidence_sum = confidence_sum + excluded.confidence_sum,
            confidence_count = confidence_count + excluded.confidence_count,
            avg_confidence = CASE
                WHEN confidence_count + excluded.confidence_count > 0
                THEN (confidence_sum + excluded.confidence_sum)
                     / (confidence_count + excluded.confidence_count)
                ELSE NULL
            END
        "#,
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .bind(delta.attempted as i64)
    .bind(delta.succeeded as i64)
    .bind(delta.failed as i64)
    .bind(delta.confidence_sum)
    .bind(delta.confidence_count as i64)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_daily(pool: &SqlitePool, date: NaiveDate) -> Result<Option<DailyStatistic>> {
    let row = sqlx::query(
        "SELECT date, attempted, succeeded, failed, avg_confidence FROM daily_statistics WHERE date = ?",
    )
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_statistic(&r)).transpose()
}

/// Most recent `days` rows, newest first
pub async fn recent_daily(pool: &SqlitePool, days: u32) -> Result<Vec<DailyStatistic>> {
    let rows = sqlx::query(
        r#"
        SELECT date, attempted, succeeded, failed, avg_confidence
        FROM daily_statistics
        ORDER BY date DESC
        LIMIT ?
        "#,
    )
    .bind(i64::from(days))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_statistic).collect()
}

fn row_to_statistic(row: &sqlx::sqlite::SqliteRow) -> Result<DailyStatistic> {
    let date: String = row.get("date");
    let attempted: i64 = row.get("attempted");
    let succeeded: i64 = row.get("succeeded");
    let failed: i64 = row.get("failed");
    Ok(DailyStatistic {
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| Error::Internal(format!("Bad statistics date '{}': {}", date, e)))?,
        attempted: attempted as u64,
        succeeded: succeeded as u64,
        failed: failed as u64,
        avg_confidence: row.get("avg_confidence"),
    })
}
