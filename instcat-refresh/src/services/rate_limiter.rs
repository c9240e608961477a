//! Per-domain rate limiter
//!
//! One instance is constructed per run and shared by every worker through an
//! `Arc`. Each call to [`RateLimiter::wait`] reserves the next free slot for
//! the URL's host while holding the map lock, then sleeps outside the lock,
//! so concurrent callers for one host are spaced in reservation order and
//! callers for different hosts never block each other.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::FetchConfig;

const DEFAULT_MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct DomainSlot {
    /// Instant of the most recently reserved request
    last_reserved: Option<Instant>,
    /// Spacing raised by robots.txt Crawl-delay
    crawl_delay: Option<Duration>,
}

/// Enforces a minimum spacing between requests to the same domain
#[derive(Debug)]
pub struct RateLimiter {
    default_delay: Duration,
    overrides: HashMap<String, Duration>,
    /// Ceiling for robots.txt Crawl-delay
    max_crawl_delay: Duration,
    slots: Mutex<HashMap<String, DomainSlot>>,
}

impl RateLimiter {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            default_delay,
            overrides: HashMap::new(),
            max_crawl_delay: DEFAULT_MAX_CRAWL_DELAY,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        let overrides = config
            .domain_delays_ms
            .iter()
            .map(|(domain, ms)| (domain.to_ascii_lowercase(), Duration::from_millis(*ms)))
            .collect();

        Self {
            default_delay: config.domain_delay(),
            overrides,
            max_crawl_delay: config.max_crawl_delay(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Configured spacing for `domain`, before any crawl-delay adjustment
    pub fn configured_delay(&self, domain: &str) -> Duration {
        self.overrides
            .get(domain)
            .copied()
            .unwrap_or(self.default_delay)
    }

    /// Effective spacing for `domain`
    pub async fn delay_for(&self, domain: &str) -> Duration {
        let slots = self.slots.lock().await;
        self.effective_delay(domain, slots.get(domain))
    }

    fn effective_delay(&self, domain: &str, slot: Option<&DomainSlot>) -> Duration {
        let configured = self.configured_delay(domain);
        match slot.and_then(|s| s.crawl_delay) {
            Some(crawl) => configured.max(crawl),
            None => configured,
        }
    }

    /// Raise the spacing for `domain` to at least `delay`
    ///
    /// Never lowers the configured spacing. `delay` is capped at the
    /// configured maximum crawl delay.
    pub async fn set_crawl_delay(&self, domain: &str, delay: Duration) {
        let delay = if delay > self.max_crawl_delay {
            tracing::warn!(
                domain,
                requested_secs = delay.as_secs(),
                max_ms = self.max_crawl_delay.as_millis() as u64,
                "Crawl-delay above maximum, capping"
            );
            self.max_crawl_delay
        } else {
            delay
        };

        let mut slots = self.slots.lock().await;
        let slot = slots.entry(domain.to_ascii_lowercase()).or_default();
        slot.crawl_delay = Some(delay);
        tracing::debug!(domain, delay_ms = delay.as_millis() as u64, "Crawl-delay applied");
    }

    /// Wait until a request to `domain` is allowed
    ///
    /// Returns the time spent waiting.
    pub async fn wait(&self, domain: &str) -> Duration {
        let domain = domain.to_ascii_lowercase();
        let now = Instant::now();

        let scheduled = {
            let mut slots = self.slots.lock().await;
            let delay = self.effective_delay(&domain, slots.get(&domain));
            let slot = slots.entry(domain.clone()).or_default();

            let scheduled = match slot.last_reserved {
                // An unrepresentable next slot counts as free
                Some(last) => last.checked_add(delay).map_or(now, |next| next.max(now)),
                None => now,
            };
            slot.last_reserved = Some(scheduled);
            scheduled
        };

        let wait_time = scheduled.saturating_duration_since(now);
        if !wait_time.is_zero() {
            tracing::debug!(
                domain = %domain,
                wait_ms = wait_time.as_millis() as u64,
                "Rate limiting"
            );
            tokio::time::sleep_until(scheduled).await;
        }
        wait_time
    }
}

/// Lower-cased host of `url`, the rate-limiting key
pub fn domain_of(url: &reqwest::Url) -> Option<String> {
    url.host_str().map(|h| h.to_ascii_lowercase())
}
