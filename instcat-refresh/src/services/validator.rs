//! Candidate validation and commit rule
//!
//! **Type rules** (by field kind):
//! - rate/decimal/integer/currency parse as a number: `%` divides by 100,
//!   `$` and `,` are stripped; integers must be whole
//! - dates parse as ISO, `Month D, YYYY`, or `MM/DD/YYYY` and normalise to
//!   `YYYY-MM-DD`
//!
//! **Range rules** come from `[validation.ranges]`.
//!
//! **Cross-field rules**: `graduation_rate_4yr <= graduation_rate_6yr` and
//! `tuition_in_state <= tuition_out_of_state`. The caller supplies the
//! counterpart: the same document's value, else one accepted earlier in the
//! cycle, else the stored value.
//!
//! **Commit rule**: a validated candidate replaces the stored value iff its
//! confidence is at least the stored confidence or the stored value is older
//! than the staleness threshold. Below the minimum confidence a candidate
//! only ever replaces a stale value.

use chrono::{DateTime, NaiveDate, Utc};
use instcat_common::time;
use thiserror::Error;

use crate::config::{ScoringConfig, ValidationConfig};
use crate::extractors::{field_spec, FieldKind, FieldSpec};
use crate::models::FieldMetadata;

/// `(lesser, greater)` field pairs
const ORDERED_PAIRS: [(&str, &str); 2] = [
    ("graduation_rate_4yr", "graduation_rate_6yr"),
    ("tuition_in_state", "tuition_out_of_state"),
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%B %d, %Y", "%B %d %Y", "%d %B %Y", "%m/%d/%Y"];

/// Why a candidate was discarded
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("'{raw}' is not a valid {expected}")]
    Unparseable { raw: String, expected: &'static str },

    #[error("{value} is not a whole number")]
    NotWhole { value: f64 },

    #[error("{value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("{field} = {value} conflicts with {counterpart} = {counterpart_value}")]
    CrossField {
        field: String,
        value: f64,
        counterpart: String,
        counterpart_value: f64,
    },
}

/// Normalised field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Canonical string stored in `field_metadata`
    pub fn to_stored(&self) -> String {
        match self {
            FieldValue::Number(n) => format!("{}", n),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Outcome of applying the commit rule to a validated candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    /// No stored value yet
    Insert,
    /// Different value wins over the stored one
    Replace,
    /// Same value wins; metadata is refreshed, audited only on a change of
    /// source or method
    Confirm,
    /// Stored value is fresher and more trusted
    Suppress,
    /// Candidate confidence is below the configured floor
    BelowMinimum,
}

impl CommitDecision {
    /// Whether the decision always writes an audit row
    pub fn writes_audit(&self) -> bool {
        matches!(self, CommitDecision::Insert | CommitDecision::Replace)
    }

    pub fn commits(&self) -> bool {
        matches!(
            self,
            CommitDecision::Insert | CommitDecision::Replace | CommitDecision::Confirm
        )
    }
}

pub struct Validator {
    config: ValidationConfig,
    staleness_threshold_days: f64,
    min_confidence: f64,
}

impl Validator {
    pub fn new(config: ValidationConfig, scoring: &ScoringConfig) -> Self {
        Self {
            config,
            staleness_threshold_days: f64::from(scoring.staleness_threshold_days),
            min_confidence: scoring.min_confidence,
        }
    }

    /// Type and range check for one raw value
    pub fn normalize(&self, field: &FieldSpec, raw: &str) -> Result<FieldValue, Rejection> {
        let raw = raw.trim();
        let value = match field.kind {
            FieldKind::Rate | FieldKind::Decimal | FieldKind::Currency => {
                FieldValue::Number(parse_number(raw, field.kind)?)
            }
            FieldKind::Integer => {
                let n = parse_number(raw, field.kind)?;
                if n.fract() != 0.0 {
                    return Err(Rejection::NotWhole { value: n });
                }
                FieldValue::Number(n)
            }
            FieldKind::Date => FieldValue::Date(parse_date(raw)?),
        };

        if let (Some(n), Some(range)) = (value.as_number(), self.config.range_for(field.name)) {
            if !range.contains(n) {
                return Err(Rejection::OutOfRange {
                    value: n,
                    min: range.min,
                    max: range.max,
                });
            }
        }

        Ok(value)
    }

    /// Full validation: type, range, and cross-field rules
    ///
    /// `counterpart` returns the value of a related field (accepted earlier in
    /// this cycle, else stored), if any.
    pub fn validate<F>(&self, field_name: &str, raw: &str, counterpart: F) -> Result<FieldValue, Rejection>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let field =
            field_spec(field_name).ok_or_else(|| Rejection::UnknownField(field_name.to_string()))?;
        let value = self.normalize(field, raw)?;
        self.check_cross_field(field_name, &value, counterpart)?;
        Ok(value)
    }

    /// Cross-field rules for an already normalised value
    pub fn check_cross_field<F>(
        &self,
        field_name: &str,
        value: &FieldValue,
        counterpart: F,
    ) -> Result<(), Rejection>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match value.as_number() {
            Some(n) => check_ordered_pairs(field_name, n, &counterpart),
            None => Ok(()),
        }
    }

    /// Apply the commit rule for a validated value scored at `confidence`
    ///
    /// A stale stored value is always replaceable, even by a candidate below
    /// the confidence floor; otherwise the floor applies before comparing.
    pub fn commit_decision(
        &self,
        value: &str,
        confidence: f64,
        stored: Option<&FieldMetadata>,
        now: DateTime<Utc>,
    ) -> CommitDecision {
        let Some(stored) = stored else {
            return if confidence < self.min_confidence {
                CommitDecision::BelowMinimum
            } else {
                CommitDecision::Insert
            };
        };

        let stale = time::age_in_days(stored.last_updated, now) > self.staleness_threshold_days;
        if !stale && confidence < self.min_confidence {
            return CommitDecision::BelowMinimum;
        }

        if confidence >= stored.confidence || stale {
            if stored.current_value == value {
                CommitDecision::Confirm
            } else {
                CommitDecision::Replace
            }
        } else {
            CommitDecision::Suppress
        }
    }
}

fn check_ordered_pairs<F>(field_name: &str, value: f64, counterpart: &F) -> Result<(), Rejection>
where
    F: Fn(&str) -> Option<f64>,
{
    for (lesser, greater) in ORDERED_PAIRS {
        let (other, holds): (&str, fn(f64, f64) -> bool) = if field_name == lesser {
            (greater, |v: f64, o: f64| v <= o)
        } else if field_name == greater {
            (lesser, |v: f64, o: f64| v >= o)
        } else {
            continue;
        };

        if let Some(other_value) = counterpart(other) {
            if !holds(value, other_value) {
                return Err(Rejection::CrossField {
                    field: field_name.to_string(),
                    value,
                    counterpart: other.to_string(),
                    counterpart_value: other_value,
                });
            }
        }
    }
    Ok(())
}

fn parse_number(raw: &str, kind: FieldKind) -> Result<f64, Rejection> {
    let percent = raw.contains('%');
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%') && !c.is_whitespace())
        .collect();

    let expected = match kind {
        FieldKind::Integer => "integer",
        FieldKind::Currency => "currency amount",
        FieldKind::Rate => "rate",
        _ => "number",
    };

    let mut n: f64 = cleaned.parse().map_err(|_| Rejection::Unparseable {
        raw: raw.to_string(),
        expected,
    })?;
    if !n.is_finite() {
        return Err(Rejection::Unparseable {
            raw: raw.to_string(),
            expected,
        });
    }

    if percent {
        n /= 100.0;
    }
    Ok((n * 1e6).round() / 1e6)
}

fn parse_date(raw: &str) -> Result<NaiveDate, Rejection> {
    // "Jan. 15, 2027" → "Jan 15, 2027"
    let cleaned = collapse(&raw.replace('.', " "));
    DATE_FORMATS
        .iter()
        .find_map(|fmt| {
            NaiveDate::parse_from_str(&cleaned, fmt)
                .or_else(|_| NaiveDate::parse_from_str(raw, fmt))
                .ok()
        })
        .ok_or_else(|| Rejection::Unparseable {
            raw: raw.to_string(),
            expected: "date",
        })
}

fn collapse(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" ,", ",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;
    use chrono::{Duration, TimeZone};

    fn validator() -> Validator {
        Validator::new(ValidationConfig::default(), &ScoringConfig::default())
    }

    fn none(_: &str) -> Option<f64> {
        None
    }

    fn stored(value: &str, confidence: f64, last_updated: DateTime<Utc>) -> FieldMetadata {
        FieldMetadata {
            entity_id: "u1".to_string(),
            field_name: "acceptance_rate".to_string(),
            current_value: value.to_string(),
            confidence,
            source_url: "https://old.example.edu/".to_string(),
            method: ExtractionMethod::SelectorMatch,
            last_updated,
        }
    }

    #[test]
    fn test_rate_percent_and_fraction() {
        let v = validator();
        assert_eq!(
            v.validate("acceptance_rate", "6.8%", none).unwrap(),
            FieldValue::Number(0.068)
        );
        assert_eq!(
            v.validate("acceptance_rate", "0.068", none).unwrap(),
            FieldValue::Number(0.068)
        );
    }

    #[test]
    fn test_rate_above_one_rejected() {
        let err = validator().validate("acceptance_rate", "1.5", none).unwrap_err();
        assert_eq!(
            err,
            Rejection::OutOfRange {
                value: 1.5,
                min: 0.01,
                max: 1.0
            }
        );
    }

    #[test]
    fn test_currency_and_integer() {
        let v = validator();
        assert_eq!(
            v.validate("tuition_in_state", "$11,200", none).unwrap().to_stored(),
            "11200"
        );
        assert_eq!(
            v.validate("enrollment_total", "45,123", none).unwrap().to_stored(),
            "45123"
        );
        assert!(matches!(
            v.validate("sat_average", "1510.5", none),
            Err(Rejection::NotWhole { .. })
        ));
        assert!(matches!(
            v.validate("sat_average", "n/a", none),
            Err(Rejection::Unparseable { .. })
        ));
    }

    #[test]
    fn test_ranges() {
        let v = validator();
        assert!(v.validate("average_gpa", "4.0", none).is_ok());
        assert!(v.validate("average_gpa", "4.3", none).is_err());
        assert!(v.validate("sat_average", "399", none).is_err());
        assert!(v.validate("act_average", "36", none).is_ok());
        assert!(v.validate("act_average", "37", none).is_err());
        assert!(v.validate("enrollment_total", "0", none).is_err());
        assert!(v.validate("tuition_out_of_state", "$250,000", none).is_err());
    }

    #[test]
    fn test_date_formats_normalise() {
        let v = validator();
        for raw in ["2027-01-15", "January 15, 2027", "Jan. 15, 2027", "01/15/2027"] {
            assert_eq!(
                v.validate("application_deadline", raw, none)
                    .unwrap()
                    .to_stored(),
                "2027-01-15",
                "format {}",
                raw
            );
        }
        assert!(v.validate("application_deadline", "rolling", none).is_err());
        assert!(v.validate("application_deadline", "02/30/2027", none).is_err());
    }

    #[test]
    fn test_cross_field_graduation_rates() {
        let v = validator();
        let six_year = |name: &str| (name == "graduation_rate_6yr").then_some(0.80);
        assert!(v.validate("graduation_rate_4yr", "75%", six_year).is_ok());
        assert!(matches!(
            v.validate("graduation_rate_4yr", "85%", six_year),
            Err(Rejection::CrossField { .. })
        ));

        let four_year = |name: &str| (name == "graduation_rate_4yr").then_some(0.80);
        assert!(v.validate("graduation_rate_6yr", "79%", four_year).is_err());
        assert!(v.validate("graduation_rate_6yr", "80%", four_year).is_ok());
    }

    #[test]
    fn test_cross_field_tuition() {
        let v = validator();
        let in_state = |name: &str| (name == "tuition_in_state").then_some(30_000.0);
        assert!(v.validate("tuition_out_of_state", "$29,999", in_state).is_err());
        assert!(v.validate("tuition_out_of_state", "$45,000", in_state).is_ok());
    }

    #[test]
    fn test_commit_rule() {
        let v = validator();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(v.commit_decision("0.07", 0.9, None, now), CommitDecision::Insert);

        let fresh = stored("0.068", 0.90, now - Duration::days(10));
        assert_eq!(
            v.commit_decision("0.07", 0.955, Some(&fresh), now),
            CommitDecision::Replace
        );
        assert_eq!(
            v.commit_decision("0.068", 0.955, Some(&fresh), now),
            CommitDecision::Confirm
        );
        // Equal confidence replaces
        assert_eq!(
            v.commit_decision("0.07", 0.90, Some(&fresh), now),
            CommitDecision::Replace
        );

        let trusted = stored("0.068", 0.95, now - Duration::days(5));
        assert_eq!(
            v.commit_decision("0.07", 0.805, Some(&trusted), now),
            CommitDecision::Suppress
        );

        let stale = stored("0.068", 0.95, now - Duration::days(181));
        assert_eq!(
            v.commit_decision("0.07", 0.805, Some(&stale), now),
            CommitDecision::Replace
        );
    }

    #[test]
    fn test_below_minimum_blocks_insert_and_fresh_replace() {
        let v = validator();
        let now = Utc::now();
        let decision = v.commit_decision("0.07", 0.49, None, now);
        assert_eq!(decision, CommitDecision::BelowMinimum);
        assert!(!decision.commits());

        let weak = stored("0.068", 0.30, now - Duration::days(10));
        assert_eq!(
            v.commit_decision("0.07", 0.40, Some(&weak), now),
            CommitDecision::BelowMinimum
        );
        assert!(CommitDecision::Insert.writes_audit());
    }

    #[test]
    fn test_staleness_override_beats_confidence_floor() {
        let v = validator();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let stale = stored("0.068", 0.95, now - Duration::days(200));

        assert_eq!(
            v.commit_decision("0.07", 0.40, Some(&stale), now),
            CommitDecision::Replace
        );
        assert_eq!(
            v.commit_decision("0.068", 0.40, Some(&stale), now),
            CommitDecision::Confirm
        );
        assert!(!CommitDecision::Confirm.writes_audit());
    }
}
