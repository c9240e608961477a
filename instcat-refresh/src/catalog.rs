//! Catalog seeding
//!
//! A catalog file lists the institutions to track:
//!
//! ```toml
//! [[institution]]
//! id = "stanford"
//! tier = "hot"
//! sources = [
//!     { url = "https://www.stanford.edu/about/facts", class = "official_domain" },
//!     { url = "https://collegedata.example.com/stanford" },
//! ]
//!
//! [institution.baseline]
//! acceptance_rate = "3.9%"
//! enrollment_total = 17529
//! ```
//!
//! Seeding enrolls each institution, replaces its source list, and commits
//! baseline values as `unchanged_fallback` candidates. Baselines go through
//! the same validation and commit rule as fetched values, so they never
//! overwrite a better stored value.

use chrono::{DateTime, Utc};
use instcat_common::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::db::diagnostics::{record_diagnostic, Diagnostic, DiagnosticKind};
use crate::db::sources;
use crate::extractors::field_spec;
use crate::models::{ExtractionMethod, FieldCandidate, SourceClass, Tier};
use crate::services::AcceptedValue;
use crate::workflow::PipelineServices;

/// Source URL recorded for baseline values
pub const BASELINE_SOURCE: &str = "catalog:baseline";

#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default, rename = "institution")]
    pub institutions: Vec<CatalogInstitution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogInstitution {
    pub id: String,
    pub tier: Tier,
    #[serde(default)]
    pub sources: Vec<CatalogSource>,
    /// Field name → raw value
    #[serde(default)]
    pub baseline: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSource {
    pub url: String,
    #[serde(default)]
    pub class: Option<SourceClass>,
}

/// Counts from one seeding pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub enrolled: usize,
    pub updated: usize,
    pub sources: usize,
    pub baseline_committed: usize,
    pub baseline_rejected: usize,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("Catalog {}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let catalog: Catalog =
            toml::from_str(content).map_err(|e| Error::Config(format!("Parse failed: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Ids unique and non-empty, URLs absolute http(s), baseline fields known
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for inst in &self.institutions {
            if inst.id.trim().is_empty() {
                problems.push("institution with empty id".to_string());
                continue;
            }
            if !seen.insert(inst.id.as_str()) {
                problems.push(format!("duplicate institution id '{}'", inst.id));
            }
            for source in &inst.sources {
                match reqwest::Url::parse(&source.url) {
                    Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                    _ => problems.push(format!("{}: invalid source URL '{}'", inst.id, source.url)),
                }
            }
            for field in inst.baseline.keys() {
                if field_spec(field).is_none() {
                    problems.push(format!("{}: unknown baseline field '{}'", inst.id, field));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

/// Enroll every catalog institution and commit its baseline values
pub async fn seed(
    services: &PipelineServices,
    catalog: &Catalog,
    now: DateTime<Utc>,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for inst in &catalog.institutions {
        if services.queue.enroll(&inst.id, inst.tier, now).await? {
            report.enrolled += 1;
        } else {
            report.updated += 1;
        }

        let entity_sources: Vec<(String, Option<SourceClass>)> = inst
            .sources
            .iter()
            .map(|s| (s.url.clone(), s.class))
            .collect();
        sources::replace_sources(&services.db, &inst.id, &entity_sources).await?;
        report.sources += entity_sources.len();
        if entity_sources.is_empty() {
            tracing::warn!(entity_id = %inst.id, "Institution has no sources");
        }

        for (field, raw) in &inst.baseline {
            if seed_baseline(services, &inst.id, field, &baseline_text(raw), now).await? {
                report.baseline_committed += 1;
            } else {
                report.baseline_rejected += 1;
            }
        }
    }

    tracing::info!(
        enrolled = report.enrolled,
        updated = report.updated,
        sources = report.sources,
        baseline_committed = report.baseline_committed,
        baseline_rejected = report.baseline_rejected,
        "Catalog seeded"
    );
    Ok(report)
}

/// Returns whether the baseline value was committed
async fn seed_baseline(
    services: &PipelineServices,
    entity_id: &str,
    field: &str,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let stored = services.provenance.list_field_metadata(entity_id).await?;
    let counterpart = |name: &str| {
        stored
            .iter()
            .find(|m| m.field_name == name)
            .and_then(|m| m.current_value.parse::<f64>().ok())
    };

    let value = match services.validator.validate(field, raw, counterpart) {
        Ok(value) => value.to_stored(),
        Err(rejection) => {
            tracing::warn!(entity_id, field, raw_value = raw, reason = %rejection, "Baseline rejected");
            record_diagnostic(
                &services.db,
                &Diagnostic {
                    entity_id: entity_id.to_string(),
                    field_name: Some(field.to_string()),
                    kind: DiagnosticKind::ValidationRejected,
                    raw_value: Some(raw.to_string()),
                    confidence: None,
                    source_url: Some(BASELINE_SOURCE.to_string()),
                    detail: rejection.to_string(),
                    created_at: now,
                },
            )
            .await?;
            return Ok(false);
        }
    };

    let candidate = FieldCandidate {
        entity_id: entity_id.to_string(),
        field_name: field.to_string(),
        raw_value: raw.to_string(),
        method: ExtractionMethod::UnchangedFallback,
        source_url: BASELINE_SOURCE.to_string(),
    };
    let class = services.scorer.source_class(None, BASELINE_SOURCE);
    let confidence = services.scorer.score(&candidate, class, 0.0).score;

    let current = stored.iter().find(|m| m.field_name == field);
    let decision = services
        .validator
        .commit_decision(&value, confidence, current, now);
    if !decision.commits() {
        tracing::debug!(entity_id, field, decision = ?decision, "Baseline not committed");
        return Ok(false);
    }

    let accepted = AcceptedValue {
        entity_id: entity_id.to_string(),
        field_name: field.to_string(),
        value,
        confidence,
        source_url: BASELINE_SOURCE.to_string(),
        method: ExtractionMethod::UnchangedFallback,
        accepted_at: now,
    };
    services
        .provenance
        .commit(
            &accepted,
            decision,
            current.map(|m| m.current_value.as_str()),
        )
        .await?;
    Ok(true)
}

fn baseline_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
