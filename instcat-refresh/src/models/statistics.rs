//! Monitoring and history models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-day outcome aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStatistic {
    pub date: NaiveDate,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Mean confidence of values committed that day (None when nothing committed)
    pub avg_confidence: Option<f64>,
}

impl DailyStatistic {
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempted == 0 {
            None
        } else {
            Some(self.succeeded as f64 / self.attempted as f64)
        }
    }
}

/// History row for one tier batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRun {
    pub run_id: Uuid,
    pub tier: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// Provenance growth over time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthStats {
    pub total_audit_entries: u64,
    pub last_7_days: u64,
    pub last_30_days: u64,
    pub distinct_entities: u64,
    pub daily_average: f64,
}

/// How many entities currently hold a value for a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCoverage {
    pub field_name: String,
    pub entities: u64,
    pub avg_confidence: f64,
}
