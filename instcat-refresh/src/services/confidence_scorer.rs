//! Confidence scorer
//!
//! Combines three evidence dimensions into one score in [0, 1]:
//!
//! ```text
//! confidence = w_f·freshness + w_a·authority + w_c·certainty
//! ```
//!
//! - **freshness**: 1.0 for a document aged 0 days, decaying linearly to the
//!   floor (0.5) at the horizon (365 days) and staying there
//! - **authority**: weight of the source class
//! - **certainty**: weight of the extraction method
//!
//! Default weights 0.3 / 0.4 / 0.3.

use crate::config::ScoringConfig;
use crate::models::{ConfidenceRecord, ExtractionMethod, FieldCandidate, SourceClass};

pub struct ConfidenceScorer {
    config: ScoringConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Freshness for a document `age_days` old
    pub fn freshness(&self, age_days: f64) -> f64 {
        let floor = self.config.freshness_floor;
        let horizon = f64::from(self.config.freshness_horizon_days);
        if age_days <= 0.0 {
            return 1.0;
        }
        (1.0 - (1.0 - floor) * age_days / horizon).max(floor)
    }

    /// Class of a source: explicit class, else domain table (host or a
    /// parent domain), else generic third party
    pub fn source_class(&self, explicit: Option<SourceClass>, url: &str) -> SourceClass {
        if let Some(class) = explicit {
            return class;
        }

        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));

        if let Some(host) = host {
            let mut candidate = host.as_str();
            loop {
                let matched = self
                    .config
                    .domain_classes
                    .iter()
                    .find(|(domain, _)| domain.eq_ignore_ascii_case(candidate));
                if let Some((_, class)) = matched {
                    return *class;
                }
                match candidate.split_once('.') {
                    Some((_, parent)) if !parent.is_empty() => candidate = parent,
                    _ => break,
                }
            }
        }

        SourceClass::GenericThirdParty
    }

    pub fn authority(&self, class: SourceClass) -> f64 {
        self.config.authority.weight(class)
    }

    pub fn certainty(&self, method: ExtractionMethod) -> f64 {
        self.config.certainty.weight(method)
    }

    /// Weighted blend, clamped to [0, 1] and rounded to 6 decimals
    pub fn combine(&self, freshness: f64, authority: f64, certainty: f64) -> f64 {
        let w = &self.config.weights;
        let score = w.freshness * freshness + w.authority * authority + w.certainty * certainty;
        (score.clamp(0.0, 1.0) * 1e6).round() / 1e6
    }

    /// Score one candidate
    pub fn score(
        &self,
        candidate: &FieldCandidate,
        class: SourceClass,
        document_age_days: f64,
    ) -> ConfidenceRecord {
        let freshness = self.freshness(document_age_days);
        let authority = self.authority(class);
        let certainty = self.certainty(candidate.method);
        let score = self.combine(freshness, authority, certainty);

        tracing::debug!(
            entity_id = %candidate.entity_id,
            field = %candidate.field_name,
            score,
            freshness,
            authority,
            certainty,
            "Candidate scored"
        );

        ConfidenceRecord {
            entity_id: candidate.entity_id.clone(),
            field_name: candidate.field_name.clone(),
            score,
            freshness,
            authority,
            certainty,
        }
    }
}
