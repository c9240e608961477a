//! Entity source configuration
//!
//! Each entity has an ordered list of pages fetched every cycle.

use instcat_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{EntitySource, SourceClass};

/// Replace the configured sources of `entity_id`
///
/// Positions are renumbered from 0 in slice order.
pub async fn replace_sources(
    pool: &SqlitePool,
    entity_id: &str,
    sources: &[(String, Option<SourceClass>)],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entity_sources WHERE entity_id = ?")
        .bind(entity_id)
        .execute(&mut *tx)
        .await?;

    for (position, (url, class)) in sources.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO entity_sources (entity_id, position, url, source_class)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(entity_id)
        .bind(position as i64)
        .bind(url)
        .bind(class.map(|c| c.as_str()))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Sources of `entity_id` in processing order
pub async fn list_sources(pool: &SqlitePool, entity_id: &str) -> Result<Vec<EntitySource>> {
    let rows = sqlx::query(
        r#"
        SELECT entity_id, position, url, source_class
        FROM entity_sources
        WHERE entity_id = ?
        ORDER BY position
        "#,
    )
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<EntitySource> {
            let class: Option<String> = row.get("source_class");
            let position: i64 = row.get("position");
            Ok(EntitySource {
                entity_id: row.get("entity_id"),
                position: position as u32,
                url: row.get("url"),
                source_class: class.map(|c| c.parse()).transpose()?,
            })
        })
        .collect()
}

/// Forget stored content hashes for `entity_id`
pub async fn delete_source_hashes(pool: &SqlitePool, entity_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM source_hashes WHERE entity_id = ?")
        .bind(entity_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    async fn enroll(pool: &SqlitePool, entity_id: &str) {
        sqlx::query(
            r#"
            INSERT INTO schedule_entries (entity_id, tier, next_due_at, created_at, updated_at)
            VALUES (?, 'hot', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')
            "#,
        )
        .bind(entity_id)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_replace_and_list_in_order() {
        let pool = memory_pool().await;
        enroll(&pool, "u1").await;

        replace_sources(
            &pool,
            "u1",
            &[
                ("https://u1.example.edu/facts".to_string(), Some(SourceClass::OfficialDomain)),
                ("https://agg.example.com/u1".to_string(), None),
            ],
        )
        .await
        .unwrap();

        let sources = list_sources(&pool, "u1").await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].position, 0);
        assert_eq!(sources[0].source_class, Some(SourceClass::OfficialDomain));
        assert_eq!(sources[1].url, "https://agg.example.com/u1");
        assert_eq!(sources[1].source_class, None);

        replace_sources(&pool, "u1", &[("https://only.example.edu/".to_string(), None)])
            .await
            .unwrap();
        let sources = list_sources(&pool, "u1").await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://only.example.edu/");
    }

    #[tokio::test]
    async fn test_sources_require_enrolled_entity() {
        let pool = memory_pool().await;
        let result =
            replace_sources(&pool, "ghost", &[("https://x.example.edu/".to_string(), None)]).await;
        assert!(result.is_err());
    }
}
