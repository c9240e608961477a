//! Extraction diagnostics
//!
//! Rows explaining why a candidate or source did not change
//! `field_metadata`: validation rejections, suppressed lower-confidence
//! candidates, candidates below the confidence floor, and failed sources.

use chrono::{DateTime, Utc};
use instcat_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ValidationRejected,
    SuppressedLowerConfidence,
    BelowMinConfidence,
    SourceFailed,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ValidationRejected => "validation_rejected",
            DiagnosticKind::SuppressedLowerConfidence => "suppressed_lower_confidence",
            DiagnosticKind::BelowMinConfidence => "below_min_confidence",
            DiagnosticKind::SourceFailed => "source_failed",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagnosticKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "validation_rejected" => Ok(DiagnosticKind::ValidationRejected),
            "suppressed_lower_confidence" => Ok(DiagnosticKind::SuppressedLowerConfidence),
            "below_min_confidence" => Ok(DiagnosticKind::BelowMinConfidence),
            "source_failed" => Ok(DiagnosticKind::SourceFailed),
            other => Err(Error::InvalidInput(format!("Unknown diagnostic kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub entity_id: String,
    /// Absent for source-level failures
    pub field_name: Option<String>,
    pub kind: DiagnosticKind,
    pub raw_value: Option<String>,
    pub confidence: Option<f64>,
    pub source_url: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

pub async fn record_diagnostic(pool: &SqlitePool, diagnostic: &Diagnostic) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO extraction_diagnostics
            (entity_id, field_name, kind, raw_value, confidence, source_url, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&diagnostic.entity_id)
    .bind(&diagnostic.field_name)
    .bind(diagnostic.kind.as_str())
    .bind(&diagnostic.raw_value)
    .bind(diagnostic.confidence)
    .bind(&diagnostic.source_url)
    .bind(&diagnostic.detail)
    .bind(time::to_db(diagnostic.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent diagnostics for an entity, newest first
pub async fn list_diagnostics(
    pool: &SqlitePool,
    entity_id: &str,
    limit: u32,
) -> Result<Vec<Diagnostic>> {
    let rows = sqlx::query(
        r#"
        SELECT entity_id, field_name, kind, raw_value, confidence, source_url, detail, created_at
        FROM extraction_diagnostics
        WHERE entity_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(entity_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<Diagnostic> {
            let kind: String = row.get("kind");
            let created_at: String = row.get("created_at");
            Ok(Diagnostic {
                entity_id: row.get("entity_id"),
                field_name: row.get("field_name"),
                kind: kind.parse()?,
                raw_value: row.get("raw_value"),
                confidence: row.get("confidence"),
                source_url: row.get("source_url"),
                detail: row.get("detail"),
                created_at: time::from_db(&created_at)?,
            })
        })
        .collect()
}

/// Number of diagnostics of `kind` for an entity
pub async fn count_diagnostics(
    pool: &SqlitePool,
    entity_id: &str,
    kind: DiagnosticKind,
) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM extraction_diagnostics WHERE entity_id = ? AND kind = ?",
    )
    .bind(entity_id)
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use chrono::Duration;

    fn diagnostic(kind: DiagnosticKind, at: DateTime<Utc>) -> Diagnostic {
        Diagnostic {
            entity_id: "u1".to_string(),
            field_name: Some("acceptance_rate".to_string()),
            kind,
            raw_value: Some("1.5".to_string()),
            confidence: Some(0.955),
            source_url: Some("https://u1.example.edu/".to_string()),
            detail: "1.5 outside [0.01, 1]".to_string(),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_record_and_list_newest_first() {
        let pool = memory_pool().await;
        let now = time::now();

        record_diagnostic(&pool, &diagnostic(DiagnosticKind::ValidationRejected, now - Duration::minutes(5)))
            .await
            .unwrap();
        record_diagnostic(&pool, &diagnostic(DiagnosticKind::SuppressedLowerConfidence, now))
            .await
            .unwrap();

        let listed = list_diagnostics(&pool, "u1", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].kind, DiagnosticKind::SuppressedLowerConfidence);
        assert_eq!(listed[1].raw_value.as_deref(), Some("1.5"));

        assert_eq!(
            count_diagnostics(&pool, "u1", DiagnosticKind::ValidationRejected)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            count_diagnostics(&pool, "u1", DiagnosticKind::SourceFailed)
                .await
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            DiagnosticKind::ValidationRejected,
            DiagnosticKind::SuppressedLowerConfidence,
            DiagnosticKind::BelowMinConfidence,
            DiagnosticKind::SourceFailed,
        ] {
            assert_eq!(kind.as_str().parse::<DiagnosticKind>().unwrap(), kind);
        }
    }
}
