//! Pipeline configuration for instcat-refresh
//!
//! Typed, validated configuration loaded once at startup from the service
//! TOML file (`instcat-refresh.toml`). Every setting has a built-in default,
//! so a missing file or a missing section yields a runnable configuration.
//!
//! # Sections
//! - `[schedule]`: tier intervals, batch sizes, failure limits, worker count
//! - `[fetch]`: retry/backoff, timeout, per-domain spacing, user agent
//! - `[scoring]`: confidence weights, authority and certainty tables,
//!   domain classification, staleness threshold
//! - `[validation.ranges]`: per-field accepted `{ min, max }`
//! - `[monitor]`: alert thresholds
//!
//! [`PipelineConfig::validate`] rejects inconsistent values before any
//! component is constructed.

use crate::models::{ExtractionMethod, SourceClass, Tier};
use instcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schedule: ScheduleConfig,
    pub fetch: FetchConfig,
    pub scoring: ScoringConfig,
    pub validation: ValidationConfig,
    pub monitor: MonitorConfig,
}

impl PipelineConfig {
    /// Load configuration from `path`, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: PipelineConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
            info!("Pipeline configuration loaded from {}", path.display());
            config
        } else {
            info!(
                "No pipeline configuration at {}, using built-in defaults",
                path.display()
            );
            PipelineConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        self.schedule.collect_problems(&mut problems);
        self.fetch.collect_problems(&mut problems);
        self.scoring.collect_problems(&mut problems);
        self.validation.collect_problems(&mut problems);
        self.monitor.collect_problems(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hot_interval_days: u32,
    pub cold_interval_days: u32,
    pub hot_batch_size: u32,
    pub cold_batch_size: u32,
    /// Consecutive failed cycles before an entry is dead-lettered
    pub max_cycle_failures: u32,
    /// Delay before a failed entry becomes due again
    pub failed_retry_delay_minutes: u32,
    /// Bounded parallel workers per batch
    pub workers: usize,
    /// Pause between cycles in `run` mode
    pub cycle_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hot_interval_days: 14,
            cold_interval_days: 90,
            hot_batch_size: 200,
            cold_batch_size: 50,
            max_cycle_failures: 5,
            failed_retry_delay_minutes: 60,
            workers: 8,
            cycle_interval_secs: 3600,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self, tier: Tier) -> chrono::Duration {
        match tier {
            Tier::Hot => chrono::Duration::days(i64::from(self.hot_interval_days)),
            Tier::Cold => chrono::Duration::days(i64::from(self.cold_interval_days)),
        }
    }

    pub fn batch_size(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Hot => self.hot_batch_size,
            Tier::Cold => self.cold_batch_size,
        }
    }

    pub fn failed_retry_delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.failed_retry_delay_minutes))
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.hot_interval_days == 0 || self.cold_interval_days == 0 {
            problems.push("schedule intervals must be at least 1 day".to_string());
        }
        if self.hot_batch_size == 0 || self.cold_batch_size == 0 {
            problems.push("schedule batch sizes must be positive".to_string());
        }
        if self.max_cycle_failures == 0 {
            problems.push("schedule.max_cycle_failures must be positive".to_string());
        }
        if self.workers == 0 {
            problems.push("schedule.workers must be positive".to_string());
        }
    }
}

// ============================================================================
// Fetch
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Total attempts per fetch, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Ceiling for a single backoff delay
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
    /// Minimum spacing between requests to one domain
    pub domain_delay_ms: u64,
    /// Per-domain spacing overrides
    pub domain_delays_ms: BTreeMap<String, u64>,
    pub user_agent: String,
    pub respect_robots: bool,
    /// Ceiling applied to robots.txt `Crawl-delay`
    pub max_crawl_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            timeout_secs: 30,
            domain_delay_ms: 1000,
            domain_delays_ms: BTreeMap::new(),
            user_agent: format!("instcat-refresh/{}", env!("CARGO_PKG_VERSION")),
            respect_robots: true,
            max_crawl_delay_ms: 60_000,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn domain_delay(&self) -> Duration {
        Duration::from_millis(self.domain_delay_ms)
    }

    pub fn max_crawl_delay(&self) -> Duration {
        Duration::from_millis(self.max_crawl_delay_ms)
    }

    /// Delay before retry number `attempt` (0-based): base × 2^attempt, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.max_attempts == 0 {
            problems.push("fetch.max_attempts must be positive".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            problems.push("fetch.max_delay_ms must be >= fetch.base_delay_ms".to_string());
        }
        if self.timeout_secs == 0 {
            problems.push("fetch.timeout_secs must be positive".to_string());
        }
        if self.domain_delay_ms == 0 || self.domain_delays_ms.values().any(|d| *d == 0) {
            problems.push("fetch domain delays must be at least 1 ms".to_string());
        }
        if self.max_crawl_delay_ms == 0 {
            problems.push("fetch.max_crawl_delay_ms must be positive".to_string());
        }
        if self.user_agent.trim().is_empty() {
            problems.push("fetch.user_agent must not be empty".to_string());
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Blend weights for the confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub freshness: f64,
    pub authority: f64,
    pub certainty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            freshness: 0.3,
            authority: 0.4,
            certainty: 0.3,
        }
    }
}

/// Authority weight by source class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityTable {
    pub official_domain: f64,
    pub official_dataset: f64,
    pub government_api: f64,
    pub verified_aggregator: f64,
    pub generic_third_party: f64,
}

impl Default for AuthorityTable {
    fn default() -> Self {
        Self {
            official_domain: 1.0,
            official_dataset: 0.95,
            government_api: 0.90,
            verified_aggregator: 0.75,
            generic_third_party: 0.70,
        }
    }
}

impl AuthorityTable {
    pub fn weight(&self, class: SourceClass) -> f64 {
        match class {
            SourceClass::OfficialDomain => self.official_domain,
            SourceClass::OfficialDataset => self.official_dataset,
            SourceClass::GovernmentApi => self.government_api,
            SourceClass::VerifiedAggregator => self.verified_aggregator,
            SourceClass::GenericThirdParty => self.generic_third_party,
        }
    }

    fn values(&self) -> [f64; 5] {
        [
            self.official_domain,
            self.official_dataset,
            self.government_api,
            self.verified_aggregator,
            self.generic_third_party,
        ]
    }
}

/// Certainty weight by extraction method
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertaintyTable {
    pub structured_data: f64,
    pub meta_tag: f64,
    pub selector_match: f64,
    pub regex_match: f64,
    pub unchanged_fallback: f64,
}

impl Default for CertaintyTable {
    fn default() -> Self {
        Self {
            structured_data: 1.0,
            meta_tag: 0.95,
            selector_match: 0.85,
            regex_match: 0.75,
            unchanged_fallback: 0.5,
        }
    }
}

impl CertaintyTable {
    pub fn weight(&self, method: ExtractionMethod) -> f64 {
        match method {
            ExtractionMethod::StructuredData => self.structured_data,
            ExtractionMethod::MetaTag => self.meta_tag,
            ExtractionMethod::SelectorMatch => self.selector_match,
            ExtractionMethod::RegexMatch => self.regex_match,
            ExtractionMethod::UnchangedFallback => self.unchanged_fallback,
        }
    }

    fn values(&self) -> [f64; 5] {
        [
            self.structured_data,
            self.meta_tag,
            self.selector_match,
            self.regex_match,
            self.unchanged_fallback,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    pub authority: AuthorityTable,
    pub certainty: CertaintyTable,
    /// Domain → class; a key also matches its subdomains
    pub domain_classes: BTreeMap<String, SourceClass>,
    /// Stored values older than this may be replaced by lower-confidence candidates
    pub staleness_threshold_days: u32,
    /// Freshness at and beyond `freshness_horizon_days`
    pub freshness_floor: f64,
    pub freshness_horizon_days: u32,
    /// Candidates scoring below this are committed only over a stale value
    pub min_confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            authority: AuthorityTable::default(),
            certainty: CertaintyTable::default(),
            domain_classes: BTreeMap::new(),
            staleness_threshold_days: 180,
            freshness_floor: 0.5,
            freshness_horizon_days: 365,
            min_confidence: 0.5,
        }
    }
}

impl ScoringConfig {
    fn collect_problems(&self, problems: &mut Vec<String>) {
        let w = &self.weights;
        if [w.freshness, w.authority, w.certainty].iter().any(|v| *v < 0.0) {
            problems.push("scoring weights must be non-negative".to_string());
        }
        let sum = w.freshness + w.authority + w.certainty;
        if (sum - 1.0).abs() > 1e-6 {
            problems.push(format!("scoring weights must sum to 1.0 (got {})", sum));
        }
        let in_unit = |v: &f64| (0.0..=1.0).contains(v);
        if !self.authority.values().iter().all(in_unit) {
            problems.push("scoring.authority values must lie in [0, 1]".to_string());
        }
        if !self.certainty.values().iter().all(in_unit) {
            problems.push("scoring.certainty values must lie in [0, 1]".to_string());
        }
        if !in_unit(&self.freshness_floor) {
            problems.push("scoring.freshness_floor must lie in [0, 1]".to_string());
        }
        if self.freshness_horizon_days == 0 {
            problems.push("scoring.freshness_horizon_days must be positive".to_string());
        }
        if !in_unit(&self.min_confidence) {
            problems.push("scoring.min_confidence must lie in [0, 1]".to_string());
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Inclusive accepted range for a numeric field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
}

impl FieldRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Overrides for the built-in per-field ranges
    pub ranges: BTreeMap<String, FieldRange>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            ranges: default_ranges(),
        }
    }
}

impl ValidationConfig {
    /// Configured range for `field`, falling back to the built-in default
    pub fn range_for(&self, field: &str) -> Option<FieldRange> {
        self.ranges
            .get(field)
            .copied()
            .or_else(|| default_ranges().get(field).copied())
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        for (field, range) in &self.ranges {
            if !(range.min <= range.max) {
                problems.push(format!("validation range for {} has min > max", field));
            }
        }
    }
}

fn default_ranges() -> BTreeMap<String, FieldRange> {
    [
        ("acceptance_rate", FieldRange::new(0.01, 1.0)),
        ("graduation_rate_6yr", FieldRange::new(0.01, 1.0)),
        ("graduation_rate_4yr", FieldRange::new(0.01, 1.0)),
        ("retention_rate", FieldRange::new(0.01, 1.0)),
        ("average_gpa", FieldRange::new(0.0, 4.0)),
        ("sat_average", FieldRange::new(400.0, 1600.0)),
        ("act_average", FieldRange::new(1.0, 36.0)),
        ("tuition_in_state", FieldRange::new(0.0, 200_000.0)),
        ("tuition_out_of_state", FieldRange::new(0.0, 200_000.0)),
        ("enrollment_total", FieldRange::new(1.0, 1_000_000.0)),
    ]
    .into_iter()
    .map(|(name, range)| (name.to_string(), range))
    .collect()
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub backlog_warning: u64,
    pub dead_letter_warning: u64,
    pub critical_success_rate: f64,
    pub critical_window_hours: u32,
    pub warning_success_rate: f64,
    pub warning_window_hours: u32,
    pub no_completion_window_hours: u32,
    /// Hot entries are stale past this multiple of the hot interval
    pub hot_stale_factor: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            backlog_warning: 500,
            dead_letter_warning: 10,
            critical_success_rate: 0.70,
            critical_window_hours: 6,
            warning_success_rate: 0.85,
            warning_window_hours: 24,
            no_completion_window_hours: 12,
            hot_stale_factor: 1.5,
        }
    }
}

impl MonitorConfig {
    fn collect_problems(&self, problems: &mut Vec<String>) {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.critical_success_rate) || !in_unit(self.warning_success_rate) {
            problems.push("monitor success-rate thresholds must lie in [0, 1]".to_string());
        }
        if self.critical_window_hours == 0
            || self.warning_window_hours == 0
            || self.no_completion_window_hours == 0
        {
            problems.push("monitor windows must be at least 1 hour".to_string());
        }
        if self.hot_stale_factor < 1.0 {
            problems.push("monitor.hot_stale_factor must be >= 1.0".to_string());
        }
    }
}
