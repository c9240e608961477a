//! Event types for the instcat event system
//!
//! Provides the pipeline event definitions and the `EventBus` used to
//! broadcast cycle progress and monitor alerts to any in-process listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Condition that raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Success rate below threshold over a rolling window
    LowSuccessRate,
    /// No entity completed within the window
    NoCompletions,
    /// Too many due entries waiting
    QueueBacklog,
    /// Too many entries in dead letter
    DeadLetterBuildup,
    /// Hot-tier entries not refreshed within 1.5x their interval
    StaleHotTier,
}

/// Monitor alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Pipeline event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for external
/// transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A tier batch was selected and processing began
    CycleStarted {
        run_id: Uuid,
        tier: String,
        batch_size: usize,
        timestamp: DateTime<Utc>,
    },

    /// One entity finished its cycle
    EntityCompleted {
        run_id: Uuid,
        entity_id: String,
        succeeded: bool,
        fields_committed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tier batch was joined and accounted
    CycleCompleted {
        run_id: Uuid,
        tier: String,
        attempted: usize,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Monitor threshold crossed
    AlertRaised { alert: Alert },
}

/// Broadcast channel for [`PipelineEvent`]
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(8);
        let result = bus.emit(PipelineEvent::CycleStarted {
            run_id: Uuid::new_v4(),
            tier: "hot".to_string(),
            batch_size: 0,
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_alert() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let alert = Alert {
            kind: AlertKind::QueueBacklog,
            severity: AlertSeverity::Warning,
            message: "backlog 900 > 500".to_string(),
            raised_at: Utc::now(),
        };
        bus.emit_lossy(PipelineEvent::AlertRaised { alert: alert.clone() });

        match rx.recv().await.unwrap() {
            PipelineEvent::AlertRaised { alert: received } => assert_eq!(received, alert),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::AlertRaised {
            alert: Alert {
                kind: AlertKind::NoCompletions,
                severity: AlertSeverity::Critical,
                message: "none".to_string(),
                raised_at: Utc::now(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AlertRaised");
        assert_eq!(json["alert"]["severity"], "critical");
        assert_eq!(json["alert"]["kind"], "no_completions");
    }
}
