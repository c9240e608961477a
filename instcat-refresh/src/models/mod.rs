//! Data models for the refresh pipeline

pub mod field;
pub mod schedule;
pub mod source;
pub mod statistics;

pub use field::{AuditEntry, ConfidenceRecord, ExtractionMethod, FieldCandidate, FieldMetadata};
pub use schedule::{QueueStats, ScheduleEntry, ScheduleStatus, Tier};
pub use source::{EntitySource, FetchOutcome, SourceClass};
pub use statistics::{CycleRun, DailyStatistic, FieldCoverage, GrowthStats};
