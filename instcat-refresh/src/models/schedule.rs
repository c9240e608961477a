//! Schedule queue models

use chrono::{DateTime, Utc};
use instcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheduling priority class setting refresh cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Frequently refreshed (default every 14 days)
    Hot,
    /// Rarely refreshed (default every 90 days)
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Hot, Tier::Cold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Cold => "cold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hot" => Ok(Tier::Hot),
            "cold" => Ok(Tier::Cold),
            other => Err(Error::InvalidInput(format!("Unknown tier: {}", other))),
        }
    }
}

/// Lifecycle state of a schedule entry
///
/// ```text
/// pending ──► in_progress ──► done ─────┐
///    ▲             │                    │ (due again)
///    │             └──► failed ─────────┤
///    │                    │             ▼
///    │                    │        in_progress
///    │                    └──► dead_letter (attempt_count >= max)
///    └──────── reset_entry ◄──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    DeadLetter,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::InProgress => "in_progress",
            ScheduleStatus::Done => "done",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::DeadLetter => "dead_letter",
        }
    }

    /// States from which an entry may be picked up when due
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Pending | ScheduleStatus::Done | ScheduleStatus::Failed
        )
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "in_progress" => Ok(ScheduleStatus::InProgress),
            "done" => Ok(ScheduleStatus::Done),
            "failed" => Ok(ScheduleStatus::Failed),
            "dead_letter" => Ok(ScheduleStatus::DeadLetter),
            other => Err(Error::InvalidInput(format!("Unknown schedule status: {}", other))),
        }
    }
}

/// One tracked entity in the schedule queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub entity_id: String,
    pub tier: Tier,
    pub status: ScheduleStatus,
    pub next_due_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Consecutive failed cycles since the last success or reset
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of queue health used by the monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
    pub dead_letter: u64,
    /// Schedulable entries whose next_due_at has passed
    pub backlog: u64,
    /// Hot-tier entries with no success within 1.5x the hot interval
    pub stale_hot: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.done + self.failed + self.dead_letter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ScheduleStatus::Pending,
            ScheduleStatus::InProgress,
            ScheduleStatus::Done,
            ScheduleStatus::Failed,
            ScheduleStatus::DeadLetter,
        ] {
            assert_eq!(status.as_str().parse::<ScheduleStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ScheduleStatus>().is_err());
    }

    #[test]
    fn test_only_idle_states_are_schedulable() {
        assert!(ScheduleStatus::Pending.is_schedulable());
        assert!(ScheduleStatus::Done.is_schedulable());
        assert!(ScheduleStatus::Failed.is_schedulable());
        assert!(!ScheduleStatus::InProgress.is_schedulable());
        assert!(!ScheduleStatus::DeadLetter.is_schedulable());
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("hot".parse::<Tier>().unwrap(), Tier::Hot);
        assert_eq!("cold".parse::<Tier>().unwrap(), Tier::Cold);
        assert!("warm".parse::<Tier>().is_err());
    }
}
