//! Refresh workflow
//!
//! - [`entity_processor`]: one entity through fetch → change check →
//!   extraction → scoring → validation → commit, source by source
//! - [`coordinator`]: per-tier due batches over a bounded worker pool,
//!   run history, monitoring, and the long-running loop
//!
//! [`PipelineServices`] bundles the components built once per process and
//! shared by every worker.

pub mod coordinator;
pub mod entity_processor;

pub use coordinator::{CycleSummary, RefreshCoordinator};
pub use entity_processor::{process_entity, EntityOutcome};

use instcat_common::events::EventBus;
use instcat_common::{time, Result};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::extractors::ExtractionCascade;
use crate::services::{
    ChangeDetector, ConfidenceScorer, FetchExecutor, HttpTransport, Monitor, ProvenanceStore,
    RateLimiter, ReqwestTransport, ScheduleQueue, Validator,
};

/// Components of one pipeline instance
pub struct PipelineServices {
    pub db: Pool<Sqlite>,
    pub config: PipelineConfig,
    pub queue: ScheduleQueue,
    pub fetcher: FetchExecutor,
    pub cascade: ExtractionCascade,
    pub scorer: ConfidenceScorer,
    pub validator: Validator,
    pub changes: ChangeDetector,
    pub provenance: ProvenanceStore,
    pub monitor: Monitor,
    pub events: EventBus,
}

impl PipelineServices {
    /// Build every component from a validated configuration
    pub fn new(
        db: Pool<Sqlite>,
        config: PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        events: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::from_config(&config.fetch));
        let fetcher = FetchExecutor::new(transport, limiter, config.fetch.clone());

        Ok(Self {
            queue: ScheduleQueue::new(
                db.clone(),
                config.schedule.clone(),
                config.monitor.hot_stale_factor,
            ),
            fetcher,
            cascade: ExtractionCascade::with_default_strategies()?,
            scorer: ConfidenceScorer::new(config.scoring.clone()),
            validator: Validator::new(config.validation.clone(), &config.scoring),
            changes: ChangeDetector::new(db.clone()),
            provenance: ProvenanceStore::new(db.clone()),
            monitor: Monitor::new(db.clone(), config.monitor.clone(), events.clone(), time::now()),
            events,
            config,
            db,
        })
    }

    /// Build with the `reqwest` HTTP transport
    pub fn with_http(db: Pool<Sqlite>, config: PipelineConfig, events: EventBus) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.fetch.user_agent)?);
        Self::new(db, config, transport, events)
    }
}
