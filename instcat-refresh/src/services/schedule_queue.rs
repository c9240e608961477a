//! Persistent tiered schedule queue
//!
//! `schedule_entries` is the only record of pipeline progress. Every state
//! change is a single guarded `UPDATE`, so a crash at any point leaves each
//! entry in a well-defined state and [`ScheduleQueue::recover_interrupted`]
//! returns stranded `in_progress` entries to `pending`.
//!
//! **Transitions:**
//! - `mark_in_progress`: pending | done | failed → in_progress
//! - `mark_done`: in_progress → done, due again after the tier interval
//! - `mark_failed`: in_progress → failed (retry after delay) or dead_letter
//!   once `attempt_count` reaches `max_cycle_failures`
//! - `reset_entry`: any → pending, due now

use chrono::{DateTime, Duration, Utc};
use instcat_common::{time, Error, Result};
use sqlx::{Pool, Row, Sqlite};

use crate::config::ScheduleConfig;
use crate::models::{QueueStats, ScheduleEntry, ScheduleStatus, Tier};
use crate::utils::{db_retry::DEFAULT_MAX_LOCK_WAIT_MS, retry_on_lock};

const SELECT_ENTRY: &str = r#"
    SELECT entity_id, tier, status, next_due_at, last_attempt_at, last_success_at,
           attempt_count, last_error, created_at, updated_at
    FROM schedule_entries
"#;

pub struct ScheduleQueue {
    db: Pool<Sqlite>,
    config: ScheduleConfig,
    /// Hot entries without success for this multiple of the interval are stale
    hot_stale_factor: f64,
}

impl ScheduleQueue {
    pub fn new(db: Pool<Sqlite>, config: ScheduleConfig, hot_stale_factor: f64) -> Self {
        Self {
            db,
            config,
            hot_stale_factor,
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Track `entity_id`, due immediately
    ///
    /// Idempotent: an existing entry keeps its state, only its tier is
    /// updated. Returns `true` when a new entry was created.
    pub async fn enroll(&self, entity_id: &str, tier: Tier, now: DateTime<Utc>) -> Result<bool> {
        if entity_id.trim().is_empty() {
            return Err(Error::InvalidInput("entity id must not be empty".to_string()));
        }

        let existed = self.get_entry(entity_id).await?.is_some();
        let ts = time::to_db(now);

        sqlx::query(
            r#"
            INSERT INTO schedule_entries
                (entity_id, tier, status, next_due_at, attempt_count, created_at, updated_at)
            VALUES (?1, ?2, 'pending', ?3, 0, ?3, ?3)
            ON CONFLICT(entity_id) DO UPDATE SET
                tier = excluded.tier,
                updated_at = excluded.updated_at
            WHERE schedule_entries.tier != excluded.tier
            "#,
        )
        .bind(entity_id)
        .bind(tier.as_str())
        .bind(&ts)
        .execute(&self.db)
        .await?;

        if !existed {
            tracing::debug!(entity_id, tier = %tier, "Entity enrolled");
        }
        Ok(!existed)
    }

    pub async fn get_entry(&self, entity_id: &str) -> Result<Option<ScheduleEntry>> {
        let row = sqlx::query(&format!("{} WHERE entity_id = ?", SELECT_ENTRY))
            .bind(entity_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|r| row_to_entry(&r)).transpose()
    }

    /// Due entries of `tier`: schedulable status and `next_due_at <= now`,
    /// earliest first, ties broken by entity id
    pub async fn get_due_batch(
        &self,
        tier: Tier,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE tier = ?
              AND status IN ('pending', 'done', 'failed')
              AND next_due_at <= ?
            ORDER BY next_due_at, entity_id
            LIMIT ?
            "#,
            SELECT_ENTRY
        ))
        .bind(tier.as_str())
        .bind(time::to_db(now))
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    pub async fn mark_in_progress(&self, entity_id: &str, now: DateTime<Utc>) -> Result<()> {
        let ts = time::to_db(now);
        let result = retry_on_lock("mark in progress", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE schedule_entries
                SET status = 'in_progress', last_attempt_at = ?1, updated_at = ?1
                WHERE entity_id = ?2 AND status IN ('pending', 'done', 'failed')
                "#,
            )
            .bind(&ts)
            .bind(entity_id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(entity_id, "in_progress").await);
        }
        Ok(())
    }

    pub async fn mark_done(&self, entity_id: &str, now: DateTime<Utc>) -> Result<()> {
        let entry = self.require_in_progress(entity_id, "done").await?;
        let next_due = now + self.config.interval(entry.tier);
        let ts = time::to_db(now);
        let next_due = time::to_db(next_due);

        let result = retry_on_lock("mark done", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE schedule_entries
                SET status = 'done', next_due_at = ?1, attempt_count = 0,
                    last_success_at = ?2, last_error = NULL, updated_at = ?2
                WHERE entity_id = ?3 AND status = 'in_progress'
                "#,
            )
            .bind(&next_due)
            .bind(&ts)
            .bind(entity_id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(entity_id, "done").await);
        }
        Ok(())
    }

    /// Record a failed cycle; returns the resulting status
    pub async fn mark_failed(
        &self,
        entity_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduleStatus> {
        let entry = self.require_in_progress(entity_id, "failed").await?;
        let attempt_count = entry.attempt_count + 1;

        let (status, next_due) = if attempt_count >= self.config.max_cycle_failures {
            (ScheduleStatus::DeadLetter, entry.next_due_at)
        } else {
            (ScheduleStatus::Failed, now + self.config.failed_retry_delay())
        };
        let ts = time::to_db(now);
        let next_due = time::to_db(next_due);

        let result = retry_on_lock("mark failed", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            Ok(sqlx::query(
                r#"
                UPDATE schedule_entries
                SET status = ?1, attempt_count = ?2, next_due_at = ?3,
                    last_error = ?4, updated_at = ?5
                WHERE entity_id = ?6 AND status = 'in_progress'
                "#,
            )
            .bind(status.as_str())
            .bind(i64::from(attempt_count))
            .bind(&next_due)
            .bind(error)
            .bind(&ts)
            .bind(entity_id)
            .execute(&self.db)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(entity_id, "failed").await);
        }

        if status == ScheduleStatus::DeadLetter {
            tracing::warn!(
                entity_id,
                attempt_count,
                error,
                "Entity moved to dead letter"
            );
        }
        Ok(status)
    }

    /// Administrative reset: any state → pending, due now, failures cleared
    pub async fn reset_entry(&self, entity_id: &str, now: DateTime<Utc>) -> Result<()> {
        let ts = time::to_db(now);
        let result = sqlx::query(
            r#"
            UPDATE schedule_entries
            SET status = 'pending', attempt_count = 0, next_due_at = ?1,
                last_error = NULL, updated_at = ?1
            WHERE entity_id = ?2
            "#,
        )
        .bind(&ts)
        .bind(entity_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Schedule entry {}", entity_id)));
        }
        tracing::info!(entity_id, "Schedule entry reset");
        Ok(())
    }

    /// Stop tracking an entity
    ///
    /// Deletes its schedule entry, sources, and stored hashes. Audit history
    /// and current field values are kept. Returns `false` if unknown.
    pub async fn remove_entity(&self, entity_id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM source_hashes WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entity_sources WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM schedule_entries WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(entity_id, "Entity removed from schedule");
        }
        Ok(removed)
    }

    /// Return entries stranded in `in_progress` to `pending`
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE schedule_entries
            SET status = 'pending', updated_at = ?
            WHERE status = 'in_progress'
            "#,
        )
        .bind(time::to_db(now))
        .execute(&self.db)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered interrupted schedule entries");
        }
        Ok(recovered)
    }

    pub async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let mut stats = QueueStats::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM schedule_entries GROUP BY status")
            .fetch_all(&self.db)
            .await?;
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            let n = n as u64;
            match status.parse::<ScheduleStatus>()? {
                ScheduleStatus::Pending => stats.pending = n,
                ScheduleStatus::InProgress => stats.in_progress = n,
                ScheduleStatus::Done => stats.done = n,
                ScheduleStatus::Failed => stats.failed = n,
                ScheduleStatus::DeadLetter => stats.dead_letter = n,
            }
        }

        let backlog: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM schedule_entries
            WHERE status IN ('pending', 'done', 'failed') AND next_due_at <= ?
            "#,
        )
        .bind(time::to_db(now))
        .fetch_one(&self.db)
        .await?;
        stats.backlog = backlog as u64;

        let hot_interval_ms = self.config.interval(Tier::Hot).num_milliseconds() as f64;
        let stale_before = now - Duration::milliseconds((hot_interval_ms * self.hot_stale_factor) as i64);
        let stale_hot: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM schedule_entries
            WHERE tier = 'hot' AND COALESCE(last_success_at, created_at) < ?
            "#,
        )
        .bind(time::to_db(stale_before))
        .fetch_one(&self.db)
        .await?;
        stats.stale_hot = stale_hot as u64;

        Ok(stats)
    }

    /// Entries in `status`, most recently updated first
    pub async fn list_by_status(
        &self,
        status: ScheduleStatus,
        limit: u32,
    ) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = ? ORDER BY updated_at DESC, entity_id LIMIT ?",
            SELECT_ENTRY
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn require_in_progress(&self, entity_id: &str, target: &str) -> Result<ScheduleEntry> {
        let entry = self
            .get_entry(entity_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Schedule entry {}", entity_id)))?;
        if entry.status != ScheduleStatus::InProgress {
            return Err(Error::InvalidInput(format!(
                "Cannot move {} from {} to {}",
                entity_id, entry.status, target
            )));
        }
        Ok(entry)
    }

    async fn transition_error(&self, entity_id: &str, target: &str) -> Error {
        match self.get_entry(entity_id).await {
            Ok(Some(entry)) => Error::InvalidInput(format!(
                "Cannot move {} from {} to {}",
                entity_id, entry.status, target
            )),
            Ok(None) => Error::NotFound(format!("Schedule entry {}", entity_id)),
            Err(e) => e,
        }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ScheduleEntry> {
    let tier: String = row.get("tier");
    let status: String = row.get("status");
    let next_due_at: String = row.get("next_due_at");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let attempt_count: i64 = row.get("attempt_count");

    Ok(ScheduleEntry {
        entity_id: row.get("entity_id"),
        tier: tier.parse()?,
        status: status.parse()?,
        next_due_at: time::from_db(&next_due_at)?,
        last_attempt_at: time::from_db_opt(row.get("last_attempt_at"))?,
        last_success_at: time::from_db_opt(row.get("last_success_at"))?,
        attempt_count: attempt_count as u32,
        last_error: row.get("last_error"),
        created_at: time::from_db(&created_at)?,
        updated_at: time::from_db(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    async fn queue() -> ScheduleQueue {
        ScheduleQueue::new(memory_pool().await, ScheduleConfig::default(), 1.5)
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let q = queue().await;
        let now = time::now();

        assert!(q.enroll("u1", Tier::Hot, now).await.unwrap());
        assert!(!q.enroll("u1", Tier::Hot, now).await.unwrap());

        let entry = q.get_entry("u1").await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.tier, Tier::Hot);
        assert_eq!(entry.next_due_at, time::from_db(&time::to_db(now)).unwrap());
    }

    #[tokio::test]
    async fn test_enroll_updates_tier_only() {
        let q = queue().await;
        let now = time::now();
        q.enroll("u1", Tier::Hot, now).await.unwrap();
        q.mark_in_progress("u1", now).await.unwrap();

        q.enroll("u1", Tier::Cold, now).await.unwrap();
        let entry = q.get_entry("u1").await.unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Cold);
        assert_eq!(entry.status, ScheduleStatus::InProgress);
    }

    #[tokio::test]
    async fn test_in_progress_requires_schedulable_state() {
        let q = queue().await;
        let now = time::now();
        q.enroll("u1", Tier::Hot, now).await.unwrap();

        q.mark_in_progress("u1", now).await.unwrap();
        let err = q.mark_in_progress("u1", now).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = q.mark_in_progress("ghost", now).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_done_requires_in_progress() {
        let q = queue().await;
        let now = time::now();
        q.enroll("u1", Tier::Hot, now).await.unwrap();

        let err = q.mark_done("u1", now).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_done_schedules_next_interval() {
        let q = queue().await;
        let now = time::from_db("2026-03-01T00:00:00.000Z").unwrap();
        q.enroll("u1", Tier::Cold, now).await.unwrap();
        q.mark_in_progress("u1", now).await.unwrap();
        q.mark_done("u1", now).await.unwrap();

        let entry = q.get_entry("u1").await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Done);
        assert_eq!(entry.next_due_at, now + Duration::days(90));
        assert_eq!(entry.last_success_at, Some(now));
        assert_eq!(entry.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_failures_lead_to_dead_letter() {
        let q = queue().await;
        let mut now = time::from_db("2026-03-01T00:00:00.000Z").unwrap();
        q.enroll("u1", Tier::Hot, now).await.unwrap();

        for attempt in 1..=5u32 {
            q.mark_in_progress("u1", now).await.unwrap();
            let status = q.mark_failed("u1", "all sources failed", now).await.unwrap();
            let entry = q.get_entry("u1").await.unwrap().unwrap();
            assert_eq!(entry.attempt_count, attempt);
            if attempt < 5 {
                assert_eq!(status, ScheduleStatus::Failed);
                assert_eq!(entry.next_due_at, now + Duration::minutes(60));
            } else {
                assert_eq!(status, ScheduleStatus::DeadLetter);
            }
            now = now + Duration::hours(2);
        }

        // Dead letter is never returned as due and cannot be started
        assert!(q.get_due_batch(Tier::Hot, 10, now).await.unwrap().is_empty());
        assert!(q.mark_in_progress("u1", now).await.is_err());

        q.reset_entry("u1", now).await.unwrap();
        let entry = q.get_entry("u1").await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.attempt_count, 0);
        assert_eq!(q.get_due_batch(Tier::Hot, 10, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_batch_order_and_limit() {
        let q = queue().await;
        let base = time::from_db("2026-03-01T00:00:00.000Z").unwrap();
        q.enroll("b", Tier::Hot, base).await.unwrap();
        q.enroll("a", Tier::Hot, base).await.unwrap();
        q.enroll("c", Tier::Hot, base - Duration::hours(1)).await.unwrap();
        q.enroll("future", Tier::Hot, base + Duration::days(1)).await.unwrap();
        q.enroll("cold", Tier::Cold, base).await.unwrap();

        let batch = q.get_due_batch(Tier::Hot, 10, base).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let batch = q.get_due_batch(Tier::Hot, 2, base).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let q = queue().await;
        let now = time::now();
        q.enroll("u1", Tier::Hot, now).await.unwrap();
        q.enroll("u2", Tier::Hot, now).await.unwrap();
        q.mark_in_progress("u1", now).await.unwrap();

        assert_eq!(q.recover_interrupted(now).await.unwrap(), 1);
        let entry = q.get_entry("u1").await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(q.recover_interrupted(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let q = queue().await;
        let now = time::from_db("2026-06-01T00:00:00.000Z").unwrap();
        let long_ago = now - Duration::days(30);

        q.enroll("old_hot", Tier::Hot, long_ago).await.unwrap();
        q.enroll("new_hot", Tier::Hot, now).await.unwrap();
        q.enroll("cold", Tier::Cold, long_ago).await.unwrap();
        q.mark_in_progress("cold", now).await.unwrap();

        let stats = q.queue_stats(now).await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.backlog, 2);
        // 30 days > 1.5 × 14 days
        assert_eq!(stats.stale_hot, 1);
        assert_eq!(stats.total(), 3);
    }

    #[tokio::test]
    async fn test_remove_entity() {
        let q = queue().await;
        let now = time::now();
        q.enroll("u1", Tier::Hot, now).await.unwrap();

        assert!(q.remove_entity("u1").await.unwrap());
        assert!(q.get_entry("u1").await.unwrap().is_none());
        assert!(!q.remove_entity("u1").await.unwrap());
    }
}
