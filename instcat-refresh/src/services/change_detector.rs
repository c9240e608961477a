//! Change detection
//!
//! Hashes whitespace-normalised document content (SHA-256, hex) and compares
//! it with the hash stored for the same (entity, source_url) pair. An exact
//! match means the source is skipped for this cycle.
//!
//! The new hash is recorded only after the source has been fully processed,
//! so a crash mid-source re-extracts it on the next run.

use instcat_common::{time, Result};
use sha2::{Digest, Sha256};
use sqlx::{Pool, Row, Sqlite};

use crate::models::FetchOutcome;

/// SHA-256 of `content` with every whitespace run collapsed to one space
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    let mut first = true;
    for token in content.split_whitespace() {
        if !first {
            hasher.update(b" ");
        }
        hasher.update(token.as_bytes());
        first = false;
    }
    format!("{:x}", hasher.finalize())
}

pub struct ChangeDetector {
    db: Pool<Sqlite>,
}

impl ChangeDetector {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Hash recorded on the previous cycle, if any
    pub async fn stored_hash(&self, entity_id: &str, source_url: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT content_hash FROM source_hashes WHERE entity_id = ? AND source_url = ?",
        )
        .bind(entity_id)
        .bind(source_url)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| r.get("content_hash")))
    }

    /// True when `content_hash` equals the stored hash for the pair
    pub async fn is_unchanged(
        &self,
        entity_id: &str,
        source_url: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let unchanged = self
            .stored_hash(entity_id, source_url)
            .await?
            .map(|stored| stored == content_hash)
            .unwrap_or(false);

        if unchanged {
            tracing::debug!(
                entity_id,
                source_url,
                "Source content unchanged, skipping extraction"
            );
        }
        Ok(unchanged)
    }

    /// Record the hash of a processed source
    pub async fn record(&self, outcome: &FetchOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_hashes (entity_id, source_url, content_hash, http_status, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entity_id, source_url) DO UPDATE SET
                content_hash = excluded.content_hash,
                http_status = excluded.http_status,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(&outcome.entity_id)
        .bind(&outcome.source_url)
        .bind(&outcome.content_hash)
        .bind(i64::from(outcome.http_status))
        .bind(time::to_db(outcome.fetched_at))
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
