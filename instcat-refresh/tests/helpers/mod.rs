//! Test helper utilities
//!
//! Shared setup for instcat-refresh integration tests: temporary databases,
//! a scripted HTTP transport, and fast pipeline configuration.

#![allow(dead_code)]

use async_trait::async_trait;
use instcat_common::events::EventBus;
use instcat_refresh::config::PipelineConfig;
use instcat_refresh::models::{SourceClass, Tier};
use instcat_refresh::services::{HttpTransport, RawResponse, TransportError};
use instcat_refresh::workflow::PipelineServices;
use reqwest::Url;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Temporary on-disk database with the full schema
///
/// The `TempDir` must outlive the pool.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("instcat_test.db");
    let pool = instcat_common::db::init::init_database(&db_path)
        .await
        .unwrap();
    (temp_dir, pool)
}

/// Defaults with delays shrunk to milliseconds
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.fetch.base_delay_ms = 1;
    config.fetch.max_delay_ms = 2;
    config.fetch.domain_delay_ms = 1;
    config.schedule.workers = 4;
    config
        .scoring
        .domain_classes
        .insert("example.edu".to_string(), SourceClass::OfficialDomain);
    config
}

/// Transport answering from per-URL scripts
///
/// A URL set with [`StubTransport::set`] returns the same response on every
/// call. Unknown URLs (including every robots.txt) answer 404.
#[derive(Default)]
pub struct StubTransport {
    responses: Mutex<HashMap<String, Result<RawResponse, TransportError>>>,
    calls: Mutex<HashMap<String, u32>>,
    total: AtomicU32,
}

impl StubTransport {
    pub fn set(&self, url: &str, response: Result<RawResponse, TransportError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Serve `body` as a 200 text/html page
    pub fn page(&self, url: &str, body: &str) {
        self.set(url, Ok(RawResponse::html(200, body)));
    }

    pub fn calls_to(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn get(&self, url: &Url, _timeout: Duration) -> Result<RawResponse, TransportError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.as_str().to_string())
            .or_default() += 1;

        match self.responses.lock().unwrap().get(url.as_str()) {
            Some(response) => response.clone(),
            None => Ok(RawResponse::html(404, "")),
        }
    }
}

/// Pipeline over a fresh temporary database and a stub transport
pub struct TestPipeline {
    pub _temp_dir: TempDir,
    pub services: Arc<PipelineServices>,
    pub transport: Arc<StubTransport>,
    pub events: EventBus,
}

pub async fn test_pipeline(config: PipelineConfig) -> TestPipeline {
    let (temp_dir, pool) = create_test_db().await;
    let transport = Arc::new(StubTransport::default());
    let events = EventBus::new(64);
    let services = PipelineServices::new(
        pool,
        config,
        Arc::clone(&transport) as Arc<dyn HttpTransport>,
        events.clone(),
    )
    .unwrap();

    TestPipeline {
        _temp_dir: temp_dir,
        services: Arc::new(services),
        transport,
        events,
    }
}

impl TestPipeline {
    /// Enroll an entity with its sources
    pub async fn add_entity(&self, entity_id: &str, tier: Tier, sources: &[(&str, Option<SourceClass>)]) {
        self.services
            .queue
            .enroll(entity_id, tier, instcat_common::time::now())
            .await
            .unwrap();
        let sources: Vec<(String, Option<SourceClass>)> = sources
            .iter()
            .map(|(url, class)| (url.to_string(), *class))
            .collect();
        instcat_refresh::db::sources::replace_sources(&self.services.db, entity_id, &sources)
            .await
            .unwrap();
    }
}
