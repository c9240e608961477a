//! Provenance store
//!
//! Owns `audit_log` (append-only history of accepted value changes) and
//! `field_metadata` (latest accepted value per entity and field).
//!
//! The accept path goes through [`ProvenanceStore::commit`], which writes the
//! audit row and the metadata upsert in one transaction so the two tables
//! never disagree. `field_metadata` is written nowhere else in the pipeline.
//! A reconfirmed value that moves to another source or method is audited
//! too, so the history shows where the current value came from.

use chrono::{DateTime, Duration, Utc};
use instcat_common::{time, Error, Result};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};

use crate::models::{AuditEntry, ExtractionMethod, FieldCoverage, FieldMetadata, GrowthStats};
use crate::services::validator::CommitDecision;
use crate::utils::{retry_on_lock, db_retry::DEFAULT_MAX_LOCK_WAIT_MS};

/// A validated, scored value about to be committed
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedValue {
    pub entity_id: String,
    pub field_name: String,
    pub value: String,
    pub confidence: f64,
    pub source_url: String,
    pub method: ExtractionMethod,
    pub accepted_at: DateTime<Utc>,
}

pub struct ProvenanceStore {
    db: Pool<Sqlite>,
}

impl ProvenanceStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Append one audit row, returning its id
    pub async fn record_audit(&self, entry: &AuditEntry) -> Result<i64> {
        let mut conn = self.db.acquire().await?;
        insert_audit(&mut *conn, entry).await
    }

    /// Insert or overwrite the single current row for (entity, field)
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_field_metadata(
        &self,
        entity_id: &str,
        field_name: &str,
        value: &str,
        confidence: f64,
        source_url: &str,
        method: ExtractionMethod,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        upsert_metadata(
            &mut *conn,
            &FieldMetadata {
                entity_id: entity_id.to_string(),
                field_name: field_name.to_string(),
                current_value: value.to_string(),
                confidence,
                source_url: source_url.to_string(),
                method,
                last_updated: updated_at,
            },
        )
        .await
    }

    /// Commit an accepted value, returning whether an audit row was written
    ///
    /// `Insert`/`Replace` append an audit row (`old_value` is the stored value
    /// being replaced) and upsert metadata in one transaction. `Confirm`
    /// refreshes metadata, and is audited only when the value now comes from
    /// a different source URL or extraction method. Other decisions are
    /// rejected.
    pub async fn commit(
        &self,
        accepted: &AcceptedValue,
        decision: CommitDecision,
        old_value: Option<&str>,
    ) -> Result<bool> {
        if !decision.commits() {
            return Err(Error::InvalidInput(format!(
                "{:?} is not a committing decision",
                decision
            )));
        }

        let audited = retry_on_lock("commit field", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.db.begin().await?;

            let audit = match decision {
                CommitDecision::Confirm => provenance_changed(&mut *tx, accepted).await?,
                _ => decision.writes_audit(),
            };
            if audit {
                insert_audit(
                    &mut *tx,
                    &AuditEntry {
                        id: None,
                        entity_id: accepted.entity_id.clone(),
                        field_name: accepted.field_name.clone(),
                        old_value: old_value.map(str::to_string),
                        new_value: accepted.value.clone(),
                        confidence: accepted.confidence,
                        source_url: accepted.source_url.clone(),
                        method: accepted.method,
                        timestamp: accepted.accepted_at,
                    },
                )
                .await?;
            }

            upsert_metadata(
                &mut *tx,
                &FieldMetadata {
                    entity_id: accepted.entity_id.clone(),
                    field_name: accepted.field_name.clone(),
                    current_value: accepted.value.clone(),
                    confidence: accepted.confidence,
                    source_url: accepted.source_url.clone(),
                    method: accepted.method,
                    last_updated: accepted.accepted_at,
                },
            )
            .await?;

            tx.commit().await?;
            Ok::<bool, Error>(audit)
        })
        .await?;

        tracing::debug!(
            entity_id = %accepted.entity_id,
            field = %accepted.field_name,
            value = %accepted.value,
            confidence = accepted.confidence,
            decision = ?decision,
            audited,
            "Field committed"
        );
        Ok(audited)
    }

    pub async fn get_field_metadata(
        &self,
        entity_id: &str,
        field_name: &str,
    ) -> Result<Option<FieldMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT entity_id, field_name, current_value, confidence, source_url, method, last_updated
            FROM field_metadata
            WHERE entity_id = ? AND field_name = ?
            "#,
        )
        .bind(entity_id)
        .bind(field_name)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| row_to_metadata(&r)).transpose()
    }

    /// All current fields of an entity, by field name
    pub async fn list_field_metadata(&self, entity_id: &str) -> Result<Vec<FieldMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_id, field_name, current_value, confidence, source_url, method, last_updated
            FROM field_metadata
            WHERE entity_id = ?
            ORDER BY field_name
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_metadata).collect()
    }

    /// Audit rows for an entity (optionally one field), oldest first
    pub async fn audit_history(
        &self,
        entity_id: &str,
        field_name: Option<&str>,
    ) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_id, field_name, old_value, new_value, confidence,
                   source_url, method, timestamp
            FROM audit_log
            WHERE entity_id = ?1 AND (?2 IS NULL OR field_name = ?2)
            ORDER BY id
            "#,
        )
        .bind(entity_id)
        .bind(field_name)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<AuditEntry> {
                let method: String = row.get("method");
                let timestamp: String = row.get("timestamp");
                Ok(AuditEntry {
                    id: Some(row.get("id")),
                    entity_id: row.get("entity_id"),
                    field_name: row.get("field_name"),
                    old_value: row.get("old_value"),
                    new_value: row.get("new_value"),
                    confidence: row.get("confidence"),
                    source_url: row.get("source_url"),
                    method: method.parse()?,
                    timestamp: time::from_db(&timestamp)?,
                })
            })
            .collect()
    }

    pub async fn audit_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.db)
            .await?;
        Ok(count as u64)
    }

    /// Audit growth as of `now`
    ///
    /// `daily_average` is the 30-day count divided by 30.
    pub async fn growth_stats(&self, now: DateTime<Utc>) -> Result<GrowthStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN timestamp >= ?1 THEN 1 ELSE 0 END), 0) AS last_7,
                COALESCE(SUM(CASE WHEN timestamp >= ?2 THEN 1 ELSE 0 END), 0) AS last_30,
                COUNT(DISTINCT entity_id) AS entities
            FROM audit_log
            "#,
        )
        .bind(time::to_db(now - Duration::days(7)))
        .bind(time::to_db(now - Duration::days(30)))
        .fetch_one(&self.db)
        .await?;

        let total: i64 = row.get("total");
        let last_7: i64 = row.get("last_7");
        let last_30: i64 = row.get("last_30");
        let entities: i64 = row.get("entities");

        Ok(GrowthStats {
            total_audit_entries: total as u64,
            last_7_days: last_7 as u64,
            last_30_days: last_30 as u64,
            distinct_entities: entities as u64,
            daily_average: last_30 as f64 / 30.0,
        })
    }

    /// Entities holding a value, per field
    pub async fn field_coverage(&self) -> Result<Vec<FieldCoverage>> {
        let rows = sqlx::query(
            r#"
            SELECT field_name, COUNT(*) AS entities, AVG(confidence) AS avg_confidence
            FROM field_metadata
            GROUP BY field_name
            ORDER BY field_name
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let entities: i64 = row.get("entities");
                FieldCoverage {
                    field_name: row.get("field_name"),
                    entities: entities as u64,
                    avg_confidence: row.get("avg_confidence"),
                }
            })
            .collect())
    }
}

async fn insert_audit(conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log
            (entity_id, field_name, old_value, new_value, confidence, source_url, method, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.entity_id)
    .bind(&entry.field_name)
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(entry.confidence)
    .bind(&entry.source_url)
    .bind(entry.method.as_str())
    .bind(time::to_db(entry.timestamp))
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Whether the stored row for the accepted field names another source or method
async fn provenance_changed(conn: &mut SqliteConnection, accepted: &AcceptedValue) -> Result<bool> {
    let row = sqlx::query(
        "SELECT source_url, method FROM field_metadata WHERE entity_id = ? AND field_name = ?",
    )
    .bind(&accepted.entity_id)
    .bind(&accepted.field_name)
    .fetch_optional(conn)
    .await?;

    Ok(row
        .map(|r| {
            let source_url: String = r.get("source_url");
            let method: String = r.get("method");
            source_url != accepted.source_url || method != accepted.method.as_str()
        })
        .unwrap_or(false))
}

async fn upsert_metadata(conn: &mut SqliteConnection, metadata: &FieldMetadata) -> Result<()> {
    if !(0.0..=1.0).contains(&metadata.confidence) {
        return Err(Error::InvalidInput(format!(
            "confidence {} outside [0, 1]",
            metadata.confidence
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO field_metadata
            (entity_id, field_name, current_value, confidence, source_url, method, last_updated)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(entity_id, field_name) DO UPDATE SET
            current_value = excluded.current_value,
            confidence = excluded.confidence,
            source_url = excluded.source_url,
            method = excluded.method,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(&metadata.entity_id)
    .bind(&metadata.field_name)
    .bind(&metadata.current_value)
    .bind(metadata.confidence)
    .bind(&metadata.source_url)
    .bind(metadata.method.as_str())
    .bind(time::to_db(metadata.last_updated))
    .execute(conn)
    .await?;

    Ok(())
}

fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<FieldMetadata> {
    let method: String = row.get("method");
    let last_updated: String = row.get("last_updated");
    Ok(FieldMetadata {
        entity_id: row.get("entity_id"),
        field_name: row.get("field_name"),
        current_value: row.get("current_value"),
        confidence: row.get("confidence"),
        source_url: row.get("source_url"),
        method: method.parse()?,
        last_updated: time::from_db(&last_updated)?,
    })
}
