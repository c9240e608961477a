//! Per-entity refresh
//!
//! Sources are processed in position order, fields in declared order.
//! The first candidate that passes validation fills its field for the rest
//! of the cycle; later pages are not consulted for that field. Cross-field
//! rules compare against the same document's value when it has one.
//!
//! **Source outcome:**
//! - fetch failed → `source_failed` diagnostic, next source
//! - content hash unchanged → skipped, zero candidates
//! - otherwise every unfilled field goes through the cascade
//!
//! **Candidate outcome:**
//! - rejected by the validator → `validation_rejected` diagnostic
//! - below the confidence floor → `below_min_confidence` diagnostic
//! - loses to the stored value → `suppressed_lower_confidence` diagnostic
//! - otherwise committed (audit row when the value changes)

use chrono::{DateTime, Utc};
use instcat_common::{time, Result};
use std::collections::{HashMap, HashSet};

use super::PipelineServices;
use crate::db::diagnostics::{record_diagnostic, Diagnostic, DiagnosticKind};
use crate::db::sources;
use crate::extractors::FIELDS;
use crate::models::{EntitySource, FetchOutcome, FieldCandidate, FieldMetadata};
use crate::services::fetch_executor::FetchedDocument;
use crate::services::{content_hash, AcceptedValue, CommitDecision, Rejection};

/// What happened to one entity during a cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityOutcome {
    pub entity_id: String,
    pub sources_total: usize,
    /// Fetched successfully, including unchanged ones
    pub sources_fetched: usize,
    pub sources_unchanged: usize,
    pub sources_failed: usize,
    /// Confidence of every committed value
    pub committed: Vec<f64>,
    /// Committed values that wrote an audit row
    pub audited: usize,
    pub rejected: usize,
    pub suppressed: usize,
    pub last_error: Option<String>,
}

impl EntityOutcome {
    /// An entity succeeds when at least one source was fetched; an entity
    /// without sources has nothing to fail
    pub fn succeeded(&self) -> bool {
        self.sources_total == 0 || self.sources_fetched > 0
    }

    /// Failure message for the schedule entry
    pub fn failure_reason(&self) -> String {
        format!(
            "all {} sources failed: {}",
            self.sources_total,
            self.last_error.as_deref().unwrap_or("unknown error")
        )
    }
}

/// Run one refresh cycle for `entity_id`
///
/// Database errors abort the entity; fetch and validation failures are
/// recorded and processing continues.
pub async fn process_entity(services: &PipelineServices, entity_id: &str) -> Result<EntityOutcome> {
    let entity_sources = sources::list_sources(&services.db, entity_id).await?;
    let mut outcome = EntityOutcome {
        entity_id: entity_id.to_string(),
        sources_total: entity_sources.len(),
        ..EntityOutcome::default()
    };

    if entity_sources.is_empty() {
        tracing::warn!(entity_id, "Entity has no configured sources");
        return Ok(outcome);
    }

    let mut current: HashMap<String, FieldMetadata> = services
        .provenance
        .list_field_metadata(entity_id)
        .await?
        .into_iter()
        .map(|m| (m.field_name.clone(), m))
        .collect();
    let mut filled: HashSet<&'static str> = HashSet::new();

    for source in &entity_sources {
        let fetched = match services
            .fetcher
            .fetch(&source.url, services.config.fetch.timeout())
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(entity_id, url = %source.url, error = %e, "Source fetch failed");
                outcome.sources_failed += 1;
                outcome.last_error = Some(e.to_string());
                record_diagnostic(
                    &services.db,
                    &Diagnostic {
                        entity_id: entity_id.to_string(),
                        field_name: None,
                        kind: DiagnosticKind::SourceFailed,
                        raw_value: None,
                        confidence: None,
                        source_url: Some(source.url.clone()),
                        detail: e.to_string(),
                        created_at: time::now(),
                    },
                )
                .await?;
                continue;
            }
        };
        outcome.sources_fetched += 1;

        let hash = content_hash(&fetched.body);
        if services
            .changes
            .is_unchanged(entity_id, &source.url, &hash)
            .await?
        {
            tracing::debug!(entity_id, url = %source.url, "Source unchanged, skipping");
            outcome.sources_unchanged += 1;
            continue;
        }

        process_document(
            services,
            source,
            &fetched,
            &mut current,
            &mut filled,
            &mut outcome,
        )
        .await?;

        services
            .changes
            .record(&FetchOutcome {
                entity_id: entity_id.to_string(),
                source_url: source.url.clone(),
                content_hash: hash,
                fetched_at: time::now(),
                http_status: fetched.status,
            })
            .await?;
    }

    tracing::debug!(
        entity_id,
        fetched = outcome.sources_fetched,
        unchanged = outcome.sources_unchanged,
        failed = outcome.sources_failed,
        committed = outcome.committed.len(),
        rejected = outcome.rejected,
        suppressed = outcome.suppressed,
        "Entity processed"
    );
    Ok(outcome)
}

async fn process_document(
    services: &PipelineServices,
    source: &EntitySource,
    fetched: &FetchedDocument,
    current: &mut HashMap<String, FieldMetadata>,
    filled: &mut HashSet<&'static str>,
    outcome: &mut EntityOutcome,
) -> Result<()> {
    let entity_id = source.entity_id.as_str();
    let now = time::now();
    let class = services.scorer.source_class(source.source_class, &source.url);
    let age_days = document_age(fetched.last_modified, now);
    let doc = services
        .cascade
        .document(&source.url, &fetched.body, fetched.content_type.as_deref());

    // Type and range checks for every open field come first, so cross-field
    // rules see this document's own counterpart values
    let mut candidates = Vec::new();
    for field in FIELDS {
        if filled.contains(field.name) {
            continue;
        }
        let Some(candidate) = services.cascade.extract_field(&doc, entity_id, field) else {
            continue;
        };
        match services.validator.normalize(field, &candidate.raw_value) {
            Ok(value) => candidates.push((field, candidate, value)),
            Err(rejection) => {
                reject(services, outcome, entity_id, field.name, &candidate, rejection).await?
            }
        }
    }

    let document_values: HashMap<&str, f64> = candidates
        .iter()
        .filter_map(|(field, _, value)| value.as_number().map(|n| (field.name, n)))
        .collect();

    for (field, candidate, value) in candidates {
        let counterpart = |name: &str| {
            document_values.get(name).copied().or_else(|| {
                current
                    .get(name)
                    .and_then(|m| m.current_value.parse::<f64>().ok())
            })
        };
        if let Err(rejection) = services
            .validator
            .check_cross_field(field.name, &value, counterpart)
        {
            reject(services, outcome, entity_id, field.name, &candidate, rejection).await?;
            continue;
        }
        filled.insert(field.name);

        let confidence = services.scorer.score(&candidate, class, age_days).score;
        let stored_value = value.to_stored();
        let stored = current.get(field.name);
        let decision = services
            .validator
            .commit_decision(&stored_value, confidence, stored, now);

        match decision {
            CommitDecision::Insert | CommitDecision::Replace | CommitDecision::Confirm => {
                let accepted = AcceptedValue {
                    entity_id: entity_id.to_string(),
                    field_name: field.name.to_string(),
                    value: stored_value,
                    confidence,
                    source_url: candidate.source_url.clone(),
                    method: candidate.method,
                    accepted_at: now,
                };
                let old_value = stored.map(|m| m.current_value.clone());
                let audited = services
                    .provenance
                    .commit(&accepted, decision, old_value.as_deref())
                    .await?;

                outcome.committed.push(confidence);
                if audited {
                    outcome.audited += 1;
                }
                current.insert(
                    field.name.to_string(),
                    FieldMetadata {
                        entity_id: accepted.entity_id,
                        field_name: accepted.field_name,
                        current_value: accepted.value,
                        confidence,
                        source_url: accepted.source_url,
                        method: accepted.method,
                        last_updated: now,
                    },
                );
            }
            CommitDecision::Suppress => {
                let detail = match stored {
                    Some(s) => format!(
                        "confidence {:.3} below stored {:.3} (value {})",
                        confidence, s.confidence, s.current_value
                    ),
                    None => format!("confidence {:.3} below stored value", confidence),
                };
                outcome.suppressed += 1;
                diagnose(
                    services,
                    &candidate.source_url,
                    entity_id,
                    field.name,
                    DiagnosticKind::SuppressedLowerConfidence,
                    &stored_value,
                    Some(confidence),
                    detail,
                )
                .await?;
            }
            CommitDecision::BelowMinimum => {
                outcome.suppressed += 1;
                diagnose(
                    services,
                    &candidate.source_url,
                    entity_id,
                    field.name,
                    DiagnosticKind::BelowMinConfidence,
                    &stored_value,
                    Some(confidence),
                    format!(
                        "confidence {:.3} below floor {:.3}",
                        confidence, services.config.scoring.min_confidence
                    ),
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn reject(
    services: &PipelineServices,
    outcome: &mut EntityOutcome,
    entity_id: &str,
    field_name: &str,
    candidate: &FieldCandidate,
    rejection: Rejection,
) -> Result<()> {
    tracing::debug!(
        entity_id,
        field = field_name,
        raw_value = %candidate.raw_value,
        reason = %rejection,
        "Candidate rejected"
    );
    outcome.rejected += 1;
    diagnose(
        services,
        &candidate.source_url,
        entity_id,
        field_name,
        DiagnosticKind::ValidationRejected,
        &candidate.raw_value,
        None,
        rejection.to_string(),
    )
    .await
}

/// Age from `Last-Modified`; documents without it count as new
fn document_age(last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    last_modified
        .map(|lm| time::age_in_days(lm, now))
        .unwrap_or(0.0)
}

#[allow(clippy::too_many_arguments)]
async fn diagnose(
    services: &PipelineServices,
    source_url: &str,
    entity_id: &str,
    field_name: &str,
    kind: DiagnosticKind,
    raw_value: &str,
    confidence: Option<f64>,
    detail: String,
) -> Result<()> {
    record_diagnostic(
        &services.db,
        &Diagnostic {
            entity_id: entity_id.to_string(),
            field_name: Some(field_name.to_string()),
            kind,
            raw_value: Some(raw_value.to_string()),
            confidence,
            source_url: Some(source_url.to_string()),
            detail,
            created_at: time::now(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_outcome_success_rule() {
        let mut outcome = EntityOutcome {
            sources_total: 2,
            sources_failed: 2,
            last_error: Some("HTTP 503 after 3 attempts".to_string()),
            ..EntityOutcome::default()
        };
        assert!(!outcome.succeeded());
        assert_eq!(
            outcome.failure_reason(),
            "all 2 sources failed: HTTP 503 after 3 attempts"
        );

        outcome.sources_fetched = 1;
        assert!(outcome.succeeded());

        assert!(EntityOutcome::default().succeeded());
    }

    #[test]
    fn test_document_age() {
        let now = time::now();
        assert_eq!(document_age(None, now), 0.0);
        let age = document_age(Some(now - Duration::days(30)), now);
        assert!((age - 30.0).abs() < 1e-6);
    }
}
