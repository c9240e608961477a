//! Source document models

use chrono::{DateTime, Utc};
use instcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trust class of a source, determining its authority weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    /// The institution's own website
    OfficialDomain,
    /// Data file or export published by the institution
    OfficialDataset,
    /// Government statistics endpoint
    GovernmentApi,
    /// Aggregator whose figures are verified against official data
    VerifiedAggregator,
    /// Any other third party
    GenericThirdParty,
}

impl SourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceClass::OfficialDomain => "official_domain",
            SourceClass::OfficialDataset => "official_dataset",
            SourceClass::GovernmentApi => "government_api",
            SourceClass::VerifiedAggregator => "verified_aggregator",
            SourceClass::GenericThirdParty => "generic_third_party",
        }
    }
}

impl fmt::Display for SourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "official_domain" => Ok(SourceClass::OfficialDomain),
            "official_dataset" => Ok(SourceClass::OfficialDataset),
            "government_api" => Ok(SourceClass::GovernmentApi),
            "verified_aggregator" => Ok(SourceClass::VerifiedAggregator),
            "generic_third_party" => Ok(SourceClass::GenericThirdParty),
            other => Err(Error::InvalidInput(format!("Unknown source class: {}", other))),
        }
    }
}

/// A configured page fetched for an entity each cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySource {
    pub entity_id: String,
    /// Processing order within the entity's cycle
    pub position: u32,
    pub url: String,
    /// Explicit class; falls back to the authority-by-domain table when absent
    pub source_class: Option<SourceClass>,
}

/// Result of retrieving one source, consumed by change detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub entity_id: String,
    pub source_url: String,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub http_status: u16,
}
