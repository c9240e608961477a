//! Pipeline monitor
//!
//! Consumes every entity outcome. Outcomes are folded into the persisted
//! `daily_statistics` row for the day and into an in-memory rolling window
//! used for the success-rate and no-completion alerts. Queue-derived alerts
//! (backlog, dead letter, stale hot tier) come from a [`QueueStats`] snapshot.
//!
//! Alerts are logged and broadcast as [`PipelineEvent::AlertRaised`].

use chrono::{DateTime, Duration, Utc};
use instcat_common::events::{Alert, AlertKind, AlertSeverity, EventBus, PipelineEvent};
use instcat_common::Result;
use sqlx::{Pool, Sqlite};
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::config::MonitorConfig;
use crate::db::statistics::{self, DailyDelta};
use crate::models::QueueStats;

/// Success/failure counts within a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub attempted: u64,
    pub succeeded: u64,
}

impl WindowStats {
    pub fn success_rate(&self) -> Option<f64> {
        if self.attempted == 0 {
            None
        } else {
            Some(self.succeeded as f64 / self.attempted as f64)
        }
    }
}

struct MonitorState {
    observing_since: DateTime<Utc>,
    /// (completed_at, succeeded), oldest first
    outcomes: VecDeque<(DateTime<Utc>, bool)>,
}

pub struct Monitor {
    db: Pool<Sqlite>,
    config: MonitorConfig,
    events: EventBus,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(
        db: Pool<Sqlite>,
        config: MonitorConfig,
        events: EventBus,
        observing_since: DateTime<Utc>,
    ) -> Self {
        Self {
            db,
            config,
            events,
            state: Mutex::new(MonitorState {
                observing_since,
                outcomes: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record one entity outcome
    ///
    /// `committed` holds the confidence of every value committed for the
    /// entity in this cycle; it feeds the day's average confidence.
    pub async fn record_outcome(
        &self,
        succeeded: bool,
        committed: &[f64],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let delta = DailyDelta {
            attempted: 1,
            succeeded: u64::from(succeeded),
            failed: u64::from(!succeeded),
            confidence_sum: committed.iter().sum(),
            confidence_count: committed.len() as u64,
        };
        statistics::increment_daily(&self.db, at.date_naive(), delta).await?;

        let retention = Duration::hours(i64::from(self.longest_window_hours()));
        let mut state = self.state.lock().await;
        state.outcomes.push_back((at, succeeded));
        while let Some((oldest, _)) = state.outcomes.front() {
            if at - *oldest > retention {
                state.outcomes.pop_front();
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Outcomes completed within `hours` before `now`
    pub async fn window(&self, hours: u32, now: DateTime<Utc>) -> WindowStats {
        let since = now - Duration::hours(i64::from(hours));
        let state = self.state.lock().await;
        state
            .outcomes
            .iter()
            .filter(|(at, _)| *at > since && *at <= now)
            .fold(WindowStats::default(), |mut acc, (_, ok)| {
                acc.attempted += 1;
                acc.succeeded += u64::from(*ok);
                acc
            })
    }

    /// Alerts that currently hold, without logging or broadcasting
    pub async fn check(&self, queue: &QueueStats, now: DateTime<Utc>) -> Vec<Alert> {
        let cfg = &self.config;
        let mut alerts = Vec::new();
        let mut raise = |kind, severity, message: String| {
            alerts.push(Alert {
                kind,
                severity,
                message,
                raised_at: now,
            })
        };

        let critical = self.window(cfg.critical_window_hours, now).await;
        let warning = self.window(cfg.warning_window_hours, now).await;
        match (critical.success_rate(), warning.success_rate()) {
            (Some(rate), _) if rate < cfg.critical_success_rate => raise(
                AlertKind::LowSuccessRate,
                AlertSeverity::Critical,
                format!(
                    "success rate {:.1}% over {}h is below {:.0}% ({} of {} entities)",
                    rate * 100.0,
                    cfg.critical_window_hours,
                    cfg.critical_success_rate * 100.0,
                    critical.succeeded,
                    critical.attempted
                ),
            ),
            (_, Some(rate)) if rate < cfg.warning_success_rate => raise(
                AlertKind::LowSuccessRate,
                AlertSeverity::Warning,
                format!(
                    "success rate {:.1}% over {}h is below {:.0}% ({} of {} entities)",
                    rate * 100.0,
                    cfg.warning_window_hours,
                    cfg.warning_success_rate * 100.0,
                    warning.succeeded,
                    warning.attempted
                ),
            ),
            _ => {}
        }

        let observing_since = self.state.lock().await.observing_since;
        let quiet_window = Duration::hours(i64::from(cfg.no_completion_window_hours));
        if now - observing_since >= quiet_window {
            let recent = self.window(cfg.no_completion_window_hours, now).await;
            if recent.succeeded == 0 {
                raise(
                    AlertKind::NoCompletions,
                    AlertSeverity::Critical,
                    format!(
                        "no entity completed in the last {}h",
                        cfg.no_completion_window_hours
                    ),
                );
            }
        }

        if queue.backlog > cfg.backlog_warning {
            raise(
                AlertKind::QueueBacklog,
                AlertSeverity::Warning,
                format!(
                    "queue backlog {} exceeds {}",
                    queue.backlog, cfg.backlog_warning
                ),
            );
        }

        if queue.dead_letter > cfg.dead_letter_warning {
            raise(
                AlertKind::DeadLetterBuildup,
                AlertSeverity::Warning,
                format!(
                    "{} entities in dead letter exceeds {}",
                    queue.dead_letter, cfg.dead_letter_warning
                ),
            );
        }

        if queue.stale_hot > 0 {
            raise(
                AlertKind::StaleHotTier,
                AlertSeverity::Warning,
                format!(
                    "{} hot-tier entities not refreshed within {}x their interval",
                    queue.stale_hot, cfg.hot_stale_factor
                ),
            );
        }

        alerts
    }

    /// Check thresholds, then log and broadcast every alert raised
    pub async fn evaluate(&self, queue: &QueueStats, now: DateTime<Utc>) -> Vec<Alert> {
        let alerts = self.check(queue, now).await;
        for alert in &alerts {
            match alert.severity {
                AlertSeverity::Critical => tracing::error!(
                    kind = ?alert.kind,
                    severity = alert.severity.as_str(),
                    "{}",
                    alert.message
                ),
                AlertSeverity::Warning => tracing::warn!(
                    kind = ?alert.kind,
                    severity = alert.severity.as_str(),
                    "{}",
                    alert.message
                ),
            }
            self.events.emit_lossy(PipelineEvent::AlertRaised {
                alert: alert.clone(),
            });
        }
        alerts
    }

    fn longest_window_hours(&self) -> u32 {
        self.config
            .critical_window_hours
            .max(self.config.warning_window_hours)
            .max(self.config.no_completion_window_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use instcat_common::time;

    async fn monitor(since: DateTime<Utc>) -> Monitor {
        Monitor::new(
            memory_pool().await,
            MonitorConfig::default(),
            EventBus::new(16),
            since,
        )
    }

    fn t(s: &str) -> DateTime<Utc> {
        time::from_db(s).unwrap()
    }

    #[tokio::test]
    async fn test_record_outcome_updates_daily_statistics() {
        let now = t("2026-05-04T10:00:00.000Z");
        let m = monitor(now).await;

        m.record_outcome(true, &[0.9, 0.8], now).await.unwrap();
        m.record_outcome(false, &[], now).await.unwrap();

        let day = statistics::get_daily(&m.db, now.date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(day.attempted, 2);
        assert_eq!(day.succeeded, 1);
        assert_eq!(day.failed, 1);
        assert!((day.avg_confidence.unwrap() - 0.85).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_critical_success_rate() {
        let now = t("2026-05-04T10:00:00.000Z");
        let m = monitor(now - Duration::hours(1)).await;
        for i in 0..10 {
            m.record_outcome(i < 6, &[], now - Duration::minutes(i))
                .await
                .unwrap();
        }

        let alerts = m.check(&QueueStats::default(), now).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowSuccessRate);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_warning_success_rate() {
        let now = t("2026-05-04T10:00:00.000Z");
        let m = monitor(now - Duration::hours(1)).await;
        for i in 0..10 {
            m.record_outcome(i < 8, &[], now - Duration::minutes(i))
                .await
                .unwrap();
        }

        let alerts = m.check(&QueueStats::default(), now).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_no_completions_needs_full_observation_window() {
        let now = t("2026-05-04T10:00:00.000Z");

        let fresh = monitor(now - Duration::hours(2)).await;
        assert!(fresh.check(&QueueStats::default(), now).await.is_empty());

        let long_running = monitor(now - Duration::hours(13)).await;
        let alerts = long_running.check(&QueueStats::default(), now).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::NoCompletions);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_old_outcomes_leave_the_window() {
        let now = t("2026-05-04T10:00:00.000Z");
        let m = monitor(now - Duration::days(3)).await;
        m.record_outcome(false, &[], now - Duration::days(2))
            .await
            .unwrap();
        m.record_outcome(true, &[], now).await.unwrap();

        assert_eq!(
            m.window(24, now).await,
            WindowStats {
                attempted: 1,
                succeeded: 1
            }
        );
    }

    #[tokio::test]
    async fn test_queue_alerts_are_broadcast() {
        let now = t("2026-05-04T10:00:00.000Z");
        let m = monitor(now).await;
        let mut rx = m.events.subscribe();

        let queue = QueueStats {
            backlog: 501,
            dead_letter: 11,
            stale_hot: 3,
            ..QueueStats::default()
        };
        let alerts = m.evaluate(&queue, now).await;
        let kinds: Vec<_> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::QueueBacklog,
                AlertKind::DeadLetterBuildup,
                AlertKind::StaleHotTier
            ]
        );

        for expected in kinds {
            match rx.recv().await.unwrap() {
                PipelineEvent::AlertRaised { alert } => assert_eq!(alert.kind, expected),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_thresholds_are_exclusive() {
        let now = t("2026-05-04T10:00:00.000Z");
        let m = monitor(now).await;
        let queue = QueueStats {
            backlog: 500,
            dead_letter: 10,
            ..QueueStats::default()
        };
        assert!(m.check(&queue, now).await.is_empty());
    }
}
