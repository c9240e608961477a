//! Schedule queue persistence tests
//!
//! Exercise the queue against an on-disk database, including reopening the
//! database the way a restarted process would.

mod helpers;

use chrono::Duration;
use instcat_common::{time, Error};
use instcat_refresh::config::ScheduleConfig;
use instcat_refresh::db::sources;
use instcat_refresh::models::{ScheduleStatus, SourceClass, Tier};
use instcat_refresh::services::ScheduleQueue;
use tempfile::TempDir;

fn queue(pool: sqlx::SqlitePool) -> ScheduleQueue {
    ScheduleQueue::new(pool, ScheduleConfig::default(), 1.5)
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("instcat.db");
    let now = time::now();

    {
        let pool = instcat_common::db::init::init_database(&db_path).await.unwrap();
        let q = queue(pool.clone());
        q.enroll("done", Tier::Hot, now).await.unwrap();
        q.enroll("interrupted", Tier::Hot, now).await.unwrap();
        q.enroll("waiting", Tier::Cold, now).await.unwrap();

        q.mark_in_progress("done", now).await.unwrap();
        q.mark_done("done", now).await.unwrap();
        q.mark_in_progress("interrupted", now).await.unwrap();
        pool.close().await;
    }

    let pool = instcat_common::db::init::init_database(&db_path).await.unwrap();
    let q = queue(pool);
    assert_eq!(q.recover_interrupted(now).await.unwrap(), 1);

    let hot: Vec<_> = q
        .get_due_batch(Tier::Hot, 10, now)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.entity_id)
        .collect();
    assert_eq!(hot, vec!["interrupted".to_string()]);

    let done = q.get_entry("done").await.unwrap().unwrap();
    assert_eq!(done.status, ScheduleStatus::Done);
    assert_eq!(done.next_due_at, time::from_db(&time::to_db(now + Duration::days(14))).unwrap());

    assert_eq!(q.get_due_batch(Tier::Cold, 10, now).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_done_entity_is_due_again_after_interval() {
    let (_temp_dir, pool) = helpers::create_test_db().await;
    let q = queue(pool);
    let start = time::from_db("2026-01-01T00:00:00.000Z").unwrap();

    q.enroll("u1", Tier::Hot, start).await.unwrap();
    q.mark_in_progress("u1", start).await.unwrap();
    q.mark_done("u1", start).await.unwrap();

    assert!(q
        .get_due_batch(Tier::Hot, 10, start + Duration::days(13))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        q.get_due_batch(Tier::Hot, 10, start + Duration::days(14))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_success_clears_failure_count() {
    let (_temp_dir, pool) = helpers::create_test_db().await;
    let q = queue(pool);
    let now = time::now();

    q.enroll("u1", Tier::Cold, now).await.unwrap();
    q.mark_in_progress("u1", now).await.unwrap();
    q.mark_failed("u1", "HTTP 503 after 3 attempts", now).await.unwrap();

    let failed = q.get_entry("u1").await.unwrap().unwrap();
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(failed.last_error.as_deref(), Some("HTTP 503 after 3 attempts"));

    let later = now + Duration::hours(2);
    q.mark_in_progress("u1", later).await.unwrap();
    q.mark_done("u1", later).await.unwrap();

    let done = q.get_entry("u1").await.unwrap().unwrap();
    assert_eq!(done.attempt_count, 0);
    assert_eq!(done.last_error, None);
    assert_eq!(
        done.last_success_at,
        Some(time::from_db(&time::to_db(later)).unwrap())
    );
}

#[tokio::test]
async fn test_failed_requires_in_progress() {
    let (_temp_dir, pool) = helpers::create_test_db().await;
    let q = queue(pool);
    let now = time::now();

    q.enroll("u1", Tier::Hot, now).await.unwrap();
    let err = q.mark_failed("u1", "boom", now).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = q.mark_failed("ghost", "boom", now).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_remove_entity_keeps_audit_history() {
    let (_temp_dir, pool) = helpers::create_test_db().await;
    let q = queue(pool.clone());
    let store = instcat_refresh::services::ProvenanceStore::new(pool.clone());
    let now = time::now();

    q.enroll("u1", Tier::Hot, now).await.unwrap();
    sources::replace_sources(
        &pool,
        "u1",
        &[("https://www.u1.edu/".to_string(), Some(SourceClass::OfficialDomain))],
    )
    .await
    .unwrap();
    store
        .record_audit(&instcat_refresh::models::AuditEntry {
            id: None,
            entity_id: "u1".to_string(),
            field_name: "sat_average".to_string(),
            old_value: None,
            new_value: "1400".to_string(),
            confidence: 0.9,
            source_url: "https://www.u1.edu/".to_string(),
            method: instcat_refresh::models::ExtractionMethod::MetaTag,
            timestamp: now,
        })
        .await
        .unwrap();

    assert!(q.remove_entity("u1").await.unwrap());
    assert!(sources::list_sources(&pool, "u1").await.unwrap().is_empty());
    assert_eq!(store.audit_history("u1", None).await.unwrap().len(), 1);

    // Re-enrolling starts fresh
    assert!(q.enroll("u1", Tier::Hot, now).await.unwrap());
}

#[tokio::test]
async fn test_queue_stats_backlog_counts_only_schedulable() {
    let (_temp_dir, pool) = helpers::create_test_db().await;
    let q = queue(pool);
    let now = time::now();

    for id in ["a", "b", "c"] {
        q.enroll(id, Tier::Cold, now).await.unwrap();
    }
    q.mark_in_progress("c", now).await.unwrap();

    let stats = q.queue_stats(now).await.unwrap();
    assert_eq!(stats.backlog, 2);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.in_progress, 1);
    assert_eq!(stats.stale_hot, 0);
}
