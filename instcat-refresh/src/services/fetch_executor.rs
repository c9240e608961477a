//! Fetch executor
//!
//! Performs one logical GET per call: robots.txt check, rate-limited
//! request, status and content-type classification, and retry with
//! exponential backoff for transient failures.
//!
//! **Failure classes:**
//! - Transient: timeout, connect/reset errors, 5xx, 429. Retried up to
//!   `max_attempts` total with delay `base_delay × 2^attempt` (capped).
//! - Permanent: 404/410 and other 4xx, robots disallow, unsupported content
//!   type, malformed URL. Returned immediately.
//!
//! Every HTTP request, including robots.txt and each retry, first waits on
//! the shared [`RateLimiter`] for the URL's host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::services::rate_limiter::{domain_of, RateLimiter};
use crate::services::robots::RobotsRules;

/// Content types the extraction cascade can read
const ACCEPTED_CONTENT_TYPES: [&str; 5] = [
    "text/html",
    "application/xhtml+xml",
    "text/plain",
    "application/json",
    "application/ld+json",
];

/// Transport-level failure (no HTTP status available)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    /// Request could not be built (bad URL, unsupported scheme)
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Reset, truncated body, other I/O problems
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Invalid(_))
    }
}

/// Fetch failure after classification and retries
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Response as seen by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub last_modified: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/html; charset=utf-8".to_string()),
            last_modified: None,
            body: body.into(),
        }
    }
}

/// HTTP seam; the executor never talks to `reqwest` directly
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<RawResponse, TransportError>;
}

/// Production transport over `reqwest`
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> instcat_common::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| instcat_common::Error::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let last_modified = header(reqwest::header::LAST_MODIFIED);

        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(RawResponse {
            status,
            content_type,
            last_modified,
            body,
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::Invalid(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// Successfully retrieved document
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    /// Parsed `Last-Modified`, used for freshness
    pub last_modified: Option<DateTime<Utc>>,
    pub body: String,
    /// Requests made for this document, excluding robots.txt
    pub attempts: u32,
}

/// Robots-aware, rate-limited fetcher with retry
pub struct FetchExecutor {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    config: FetchConfig,
    robots: Mutex<HashMap<String, Arc<OnceCell<Arc<RobotsRules>>>>>,
}

impl FetchExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<RateLimiter>,
        config: FetchConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            config,
            robots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch `url`, honoring robots.txt, with per-attempt `timeout`
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedDocument, FetchError> {
        let parsed = Url::parse(url)
            .map_err(|e| FetchError::Permanent(format!("malformed URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::Permanent(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        let domain = domain_of(&parsed)
            .ok_or_else(|| FetchError::Permanent(format!("URL has no host: {}", url)))?;

        if self.config.respect_robots {
            let rules = self.robots_for(&parsed, &domain, timeout).await;
            let path = match parsed.query() {
                Some(q) => format!("{}?{}", parsed.path(), q),
                None => parsed.path().to_string(),
            };
            if !rules.is_allowed(&self.config.user_agent, &path) {
                return Err(FetchError::Permanent(format!(
                    "disallowed by robots.txt: {}",
                    url
                )));
            }
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt - 1);
                debug!(
                    url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying fetch after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            self.limiter.wait(&domain).await;

            match self.transport.get(&parsed, timeout).await {
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Success => {
                        check_content_type(response.content_type.as_deref())?;
                        return Ok(FetchedDocument {
                            url: url.to_string(),
                            status: response.status,
                            last_modified: response
                                .last_modified
                                .as_deref()
                                .and_then(parse_http_date),
                            content_type: response.content_type,
                            body: response.body,
                            attempts: attempt + 1,
                        });
                    }
                    StatusClass::Transient => {
                        last_error = format!("HTTP {}", response.status);
                    }
                    StatusClass::Permanent => {
                        return Err(FetchError::Permanent(format!("HTTP {}", response.status)));
                    }
                },
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                }
                Err(e) => return Err(FetchError::Permanent(e.to_string())),
            }

            warn!(
                url,
                attempt = attempt + 1,
                max_attempts,
                error = %last_error,
                "Transient fetch failure"
            );
        }

        Err(FetchError::Transient(format!(
            "{} after {} attempts",
            last_error, max_attempts
        )))
    }

    /// Cached robots.txt for the URL's origin, fetched on first use
    ///
    /// Concurrent callers for one origin share a single request. Rules from
    /// an unavailable robots.txt allow everything and are not cached.
    async fn robots_for(&self, url: &Url, domain: &str, timeout: Duration) -> Arc<RobotsRules> {
        let origin = url.origin().ascii_serialization();
        let cell = {
            let mut robots = self.robots.lock().await;
            Arc::clone(robots.entry(origin.clone()).or_default())
        };

        let loaded = cell
            .get_or_try_init(|| self.load_robots(url, domain, &origin, timeout))
            .await;
        match loaded {
            Ok(rules) => Arc::clone(rules),
            Err(uncached) => uncached,
        }
    }

    /// `Err` carries rules that must not be cached
    async fn load_robots(
        &self,
        url: &Url,
        domain: &str,
        origin: &str,
        timeout: Duration,
    ) -> Result<Arc<RobotsRules>, Arc<RobotsRules>> {
        let robots_url = match url.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return Ok(Arc::new(RobotsRules::allow_all())),
        };

        self.limiter.wait(domain).await;
        let (rules, cacheable) = match self.transport.get(&robots_url, timeout).await {
            Ok(response) if (200..300).contains(&response.status) => {
                (RobotsRules::parse(&response.body), true)
            }
            Ok(response) if (400..500).contains(&response.status) => {
                (RobotsRules::allow_all(), true)
            }
            Ok(response) => {
                warn!(origin, status = response.status, "robots.txt unavailable, allowing");
                (RobotsRules::allow_all(), false)
            }
            Err(e) => {
                warn!(origin, error = %e, "robots.txt unreachable, allowing");
                (RobotsRules::allow_all(), false)
            }
        };

        if let Some(delay) = rules.crawl_delay(&self.config.user_agent) {
            self.limiter.set_crawl_delay(domain, delay).await;
        }

        let rules = Arc::new(rules);
        if cacheable {
            Ok(rules)
        } else {
            Err(rules)
        }
    }
}

enum StatusClass {
    Success,
    Transient,
    Permanent,
}

fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

fn check_content_type(content_type: Option<&str>) -> Result<(), FetchError> {
    let Some(value) = content_type else {
        return Ok(());
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if ACCEPTED_CONTENT_TYPES.contains(&mime.as_str()) {
        Ok(())
    } else {
        Err(FetchError::Permanent(format!(
            "unsupported content type '{}'",
            mime
        )))
    }
}

/// Parse an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`)
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Replays queued responses per URL; robots.txt defaults to 404
    #[derive(Default)]
    struct ScriptedTransport {
        responses: StdMutex<HashMap<String, VecDeque<Result<RawResponse, TransportError>>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn push(&self, url: &str, response: Result<RawResponse, TransportError>) {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &Url, _timeout: Duration) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(url.as_str()).and_then(|q| q.pop_front()) {
                Some(r) => r,
                None => Ok(RawResponse::html(404, "")),
            }
        }
    }

    fn fast_config() -> FetchConfig {
        FetchConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            domain_delay_ms: 1,
            ..FetchConfig::default()
        }
    }

    fn executor(transport: Arc<ScriptedTransport>, config: FetchConfig) -> FetchExecutor {
        let limiter = Arc::new(RateLimiter::from_config(&config));
        FetchExecutor::new(transport, limiter, config)
    }

    const PAGE: &str = "https://www.example.edu/facts";

    #[tokio::test]
    async fn test_success_returns_document() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(
            PAGE,
            Ok(RawResponse {
                status: 200,
                content_type: Some("text/html".to_string()),
                last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
                body: "<p>hello</p>".to_string(),
            }),
        );
        let exec = executor(Arc::clone(&transport), fast_config());

        let doc = exec.fetch(PAGE, Duration::from_secs(5)).await.unwrap();
        assert_eq!(doc.status, 200);
        assert_eq!(doc.body, "<p>hello</p>");
        assert_eq!(doc.attempts, 1);
        assert_eq!(
            doc.last_modified.map(|d| d.to_rfc3339()),
            Some("2015-10-21T07:28:00+00:00".to_string())
        );
        // robots.txt + page
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_transient_then_success_retries() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(PAGE, Ok(RawResponse::html(503, "")));
        transport.push(PAGE, Err(TransportError::Timeout));
        transport.push(PAGE, Ok(RawResponse::html(200, "ok")));
        let exec = executor(Arc::clone(&transport), fast_config());

        let doc = exec.fetch(PAGE, Duration::from_secs(5)).await.unwrap();
        assert_eq!(doc.attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_exhausts_max_attempts() {
        let transport = Arc::new(ScriptedTransport::default());
        for _ in 0..5 {
            transport.push(PAGE, Ok(RawResponse::html(500, "")));
        }
        let exec = executor(Arc::clone(&transport), fast_config());

        let err = exec.fetch(PAGE, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_transient());
        // robots.txt + three page attempts
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_rate_limited_429_is_transient() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(PAGE, Ok(RawResponse::html(429, "")));
        transport.push(PAGE, Ok(RawResponse::html(200, "ok")));
        let exec = executor(Arc::clone(&transport), fast_config());

        assert!(exec.fetch(PAGE, Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_not_found_is_permanent_without_retry() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(PAGE, Ok(RawResponse::html(404, "")));
        let exec = executor(Arc::clone(&transport), fast_config());

        let err = exec.fetch(PAGE, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, FetchError::Permanent("HTTP 404".to_string()));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_content_type_is_permanent() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(
            PAGE,
            Ok(RawResponse {
                status: 200,
                content_type: Some("application/pdf".to_string()),
                last_modified: None,
                body: String::new(),
            }),
        );
        let exec = executor(Arc::clone(&transport), fast_config());

        let err = exec.fetch(PAGE, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(msg) if msg.contains("application/pdf")));
    }

    #[tokio::test]
    async fn test_robots_disallow_blocks_without_page_request() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(
            "https://www.example.edu/robots.txt",
            Ok(RawResponse {
                status: 200,
                content_type: Some("text/plain".to_string()),
                last_modified: None,
                body: "User-agent: *\nDisallow: /facts\n".to_string(),
            }),
        );
        let exec = executor(Arc::clone(&transport), fast_config());

        let err = exec.fetch(PAGE, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, FetchError::Permanent(msg) if msg.contains("robots")));
        assert_eq!(transport.calls(), 1);

        // Cached rules: no second robots request
        let _ = exec.fetch(PAGE, Duration::from_secs(5)).await;
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_url_is_permanent() {
        let transport = Arc::new(ScriptedTransport::default());
        let exec = executor(Arc::clone(&transport), fast_config());

        let err = exec.fetch("not a url", Duration::from_secs(5)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_content_type_parameters_ignored() {
        assert!(check_content_type(Some("text/html; charset=ISO-8859-1")).is_ok());
        assert!(check_content_type(Some("Application/LD+JSON")).is_ok());
        assert!(check_content_type(None).is_ok());
        assert!(check_content_type(Some("image/png")).is_err());
    }
}
