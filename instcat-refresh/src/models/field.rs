//! Field extraction and provenance models

use chrono::{DateTime, Utc};
use instcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Technique that produced a candidate value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Embedded JSON-LD structured data
    StructuredData,
    /// `<meta>` tag
    MetaTag,
    /// Labelled element or attribute pattern
    SelectorMatch,
    /// Free-text regular expression
    RegexMatch,
    /// Value carried over without fresh extraction (catalog baseline)
    UnchangedFallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::StructuredData => "structured_data",
            ExtractionMethod::MetaTag => "meta_tag",
            ExtractionMethod::SelectorMatch => "selector_match",
            ExtractionMethod::RegexMatch => "regex_match",
            ExtractionMethod::UnchangedFallback => "unchanged_fallback",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "structured_data" => Ok(ExtractionMethod::StructuredData),
            "meta_tag" => Ok(ExtractionMethod::MetaTag),
            "selector_match" => Ok(ExtractionMethod::SelectorMatch),
            "regex_match" => Ok(ExtractionMethod::RegexMatch),
            "unchanged_fallback" => Ok(ExtractionMethod::UnchangedFallback),
            other => Err(Error::InvalidInput(format!("Unknown extraction method: {}", other))),
        }
    }
}

/// Raw value produced by one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub entity_id: String,
    pub field_name: String,
    pub raw_value: String,
    pub method: ExtractionMethod,
    pub source_url: String,
}

/// Score breakdown for one considered candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRecord {
    pub entity_id: String,
    pub field_name: String,
    pub score: f64,
    pub freshness: f64,
    pub authority: f64,
    pub certainty: f64,
}

/// Latest accepted value of one field (one row per entity and field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub entity_id: String,
    pub field_name: String,
    pub current_value: String,
    pub confidence: f64,
    pub source_url: String,
    pub method: ExtractionMethod,
    pub last_updated: DateTime<Utc>,
}

/// Immutable record of one accepted value change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub entity_id: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub confidence: f64,
    pub source_url: String,
    pub method: ExtractionMethod,
    pub timestamp: DateTime<Utc>,
}
