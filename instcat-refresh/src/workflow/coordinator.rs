//! Refresh coordinator
//!
//! One cycle:
//! 1. Return entries stranded `in_progress` by a previous crash to `pending`
//! 2. For each tier (hot, then cold): select the due batch, process it with
//!    `workers` concurrent entities, join, then record the run
//! 3. Evaluate monitor thresholds against the queue
//!
//! Cancellation stops new entities from starting; entities already running
//! finish and are accounted. `run_forever` repeats cycles every
//! `cycle_interval_secs` until cancelled.

use futures::stream::{self, StreamExt};
use instcat_common::events::PipelineEvent;
use instcat_common::{time, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::entity_processor::process_entity;
use super::PipelineServices;
use crate::db::runs;
use crate::models::{CycleRun, ScheduleStatus, Tier};

/// Counts for one tier batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub tier: Tier,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityResult {
    Succeeded,
    Failed,
    /// Not started: cancelled, or the entry was no longer schedulable
    Skipped,
}

pub struct RefreshCoordinator {
    services: Arc<PipelineServices>,
}

impl RefreshCoordinator {
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    /// Run one full cycle over both tiers
    ///
    /// Tiers with nothing due produce no summary.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<Vec<CycleSummary>> {
        let svc = &self.services;
        svc.queue.recover_interrupted(time::now()).await?;

        let mut summaries = Vec::new();
        for tier in Tier::ALL {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(summary) = self.run_tier(tier, cancel).await? {
                summaries.push(summary);
            }
        }

        let now = time::now();
        let stats = svc.queue.queue_stats(now).await?;
        svc.monitor.evaluate(&stats, now).await;

        Ok(summaries)
    }

    /// Process the due batch of one tier
    pub async fn run_tier(
        &self,
        tier: Tier,
        cancel: &CancellationToken,
    ) -> Result<Option<CycleSummary>> {
        let svc = &self.services;
        let started_at = time::now();
        let batch = svc
            .queue
            .get_due_batch(tier, svc.config.schedule.batch_size(tier), started_at)
            .await?;

        if batch.is_empty() {
            tracing::debug!(tier = %tier, "No entities due");
            return Ok(None);
        }

        let run_id = Uuid::new_v4();
        runs::insert_run(
            &svc.db,
            &CycleRun {
                run_id,
                tier: tier.to_string(),
                started_at,
                completed_at: None,
                attempted: 0,
                succeeded: 0,
                failed: 0,
                cancelled: false,
            },
        )
        .await?;

        tracing::info!(
            run_id = %run_id,
            tier = %tier,
            batch_size = batch.len(),
            workers = svc.config.schedule.workers,
            "Cycle started"
        );
        svc.events.emit_lossy(PipelineEvent::CycleStarted {
            run_id,
            tier: tier.to_string(),
            batch_size: batch.len(),
            timestamp: started_at,
        });

        let results: Vec<EntityResult> = stream::iter(batch)
            .map(|entry| async move {
                if cancel.is_cancelled() {
                    return EntityResult::Skipped;
                }
                self.refresh_entity(run_id, &entry.entity_id).await
            })
            .buffer_unordered(svc.config.schedule.workers.max(1))
            .collect()
            .await;

        let succeeded = results
            .iter()
            .filter(|r| **r == EntityResult::Succeeded)
            .count() as u64;
        let failed = results
            .iter()
            .filter(|r| **r == EntityResult::Failed)
            .count() as u64;
        let summary = CycleSummary {
            run_id,
            tier,
            attempted: succeeded + failed,
            succeeded,
            failed,
            cancelled: cancel.is_cancelled(),
        };

        let completed_at = time::now();
        runs::complete_run(
            &svc.db,
            run_id,
            completed_at,
            summary.attempted,
            summary.succeeded,
            summary.failed,
            summary.cancelled,
        )
        .await?;

        tracing::info!(
            run_id = %run_id,
            tier = %tier,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms = (completed_at - started_at).num_milliseconds(),
            "Cycle completed"
        );
        svc.events.emit_lossy(PipelineEvent::CycleCompleted {
            run_id,
            tier: tier.to_string(),
            attempted: summary.attempted as usize,
            succeeded: summary.succeeded as usize,
            failed: summary.failed as usize,
            timestamp: completed_at,
        });

        Ok(Some(summary))
    }

    /// Repeat cycles until `cancel` fires
    ///
    /// A failed cycle is logged and retried at the next interval.
    pub async fn run_forever(&self, cancel: CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.services.config.schedule.cycle_interval_secs);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Refresh loop started"
        );

        loop {
            match self.run_cycle(&cancel).await {
                Ok(summaries) => {
                    let attempted: u64 = summaries.iter().map(|s| s.attempted).sum();
                    tracing::debug!(tiers = summaries.len(), attempted, "Cycle finished");
                }
                Err(e) => tracing::error!(error = %e, "Refresh cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Refresh loop stopped");
        Ok(())
    }

    /// One entity: claim, process, settle the schedule entry, report
    async fn refresh_entity(&self, run_id: Uuid, entity_id: &str) -> EntityResult {
        let svc = &self.services;

        if let Err(e) = svc.queue.mark_in_progress(entity_id, time::now()).await {
            tracing::warn!(entity_id, error = %e, "Could not claim entity, skipping");
            return EntityResult::Skipped;
        }

        let (succeeded, committed, failure) = match process_entity(svc, entity_id).await {
            Ok(outcome) if outcome.succeeded() => (true, outcome.committed, None),
            Ok(outcome) => {
                let reason = outcome.failure_reason();
                (false, outcome.committed, Some(reason))
            }
            Err(e) => (false, Vec::new(), Some(e.to_string())),
        };

        let now = time::now();
        let settled = match &failure {
            None => svc.queue.mark_done(entity_id, now).await.map(|_| ScheduleStatus::Done),
            Some(reason) => svc.queue.mark_failed(entity_id, reason, now).await,
        };
        let succeeded = match settled {
            Ok(status) => {
                if let Some(reason) = &failure {
                    tracing::warn!(entity_id, status = %status, error = %reason, "Entity refresh failed");
                }
                succeeded
            }
            Err(e) => {
                tracing::error!(entity_id, error = %e, "Failed to update schedule entry");
                false
            }
        };

        if let Err(e) = svc.monitor.record_outcome(succeeded, &committed, now).await {
            tracing::warn!(entity_id, error = %e, "Failed to record entity outcome");
        }

        svc.events.emit_lossy(PipelineEvent::EntityCompleted {
            run_id,
            entity_id: entity_id.to_string(),
            succeeded,
            fields_committed: committed.len(),
            timestamp: now,
        });

        if succeeded {
            EntityResult::Succeeded
        } else {
            EntityResult::Failed
        }
    }
}
