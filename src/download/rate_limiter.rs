//! Per-host request pacing.
//!
//! Registries throttle aggressive mirrors, so every request made through
//! [`HttpClient`](super::HttpClient) first calls [`RateLimiter::acquire`].
//! Requests to different hosts never wait on each other; consecutive requests
//! to the same host are spaced by at least the configured delay.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use registry_mirror::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
//!
//! // First request to a host proceeds immediately
//! limiter.acquire("https://crates.io/api/v1/crates?page=1").await;
//!
//! // Second request to the same host waits for the delay
//! limiter.acquire("https://crates.io/api/v1/crates?page=2").await;
//!
//! // Another host proceeds immediately
//! limiter.acquire("https://static.crates.io/crates/serde/serde-1.0.0.crate").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Per-host rate limiter shared by every request of a mirror run.
///
/// `RateLimiter` is `Send + Sync` and meant to live behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum delay between requests to the same host.
    default_delay: Duration,

    /// Whether pacing is disabled (`--rate-limit 0`).
    disabled: bool,

    /// Per-host state. Values are `Arc` so the map shard is released before
    /// awaiting on the inner mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug, Default)]
struct Schedule {
    /// `None` until the first request to the host.
    last_request: Option<Instant>,
    /// Set from a server Retry-After; no request leaves before it.
    not_before: Option<Instant>,
}

#[derive(Debug, Default)]
struct HostState {
    schedule: Mutex<Schedule>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter spacing same-host requests by `default_delay`.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = default_delay.as_millis()))]
    pub fn new(default_delay: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_delay,
            disabled: default_delay.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_delay: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Returns whether pacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the delay between two requests to the same host.
    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone()
    }

    /// Waits until a request to the URL's host may be sent.
    ///
    /// The first request to a host proceeds immediately unless the server
    /// asked for a pause through [`record_rate_limit`](Self::record_rate_limit).
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.host_state(&host);
        let mut schedule = state.schedule.lock().await;

        let now = Instant::now();
        let mut ready_at = schedule
            .last_request
            .map_or(now, |last| last + self.default_delay);
        if let Some(not_before) = schedule.not_before.take() {
            ready_at = ready_at.max(not_before);
        }

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = state.add_cumulative_delay(delay);
            debug!(
                host = %host,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "pacing request"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    host = %host,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive pacing delay for host"
                );
            }
            tokio::time::sleep(delay).await;
        }

        schedule.last_request = Some(Instant::now());
    }

    /// Records a server-mandated pause (Retry-After) for the URL's host.
    ///
    /// The next [`acquire`](Self::acquire) for that host waits at least `delay`.
    #[instrument(skip(self), fields(host))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", &host);

        let state = self.host_state(&host);
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        {
            let mut schedule = state.schedule.lock().await;
            schedule.not_before = Some(schedule.not_before.map_or(until, |t| t.max(until)));
        }

        debug!(host = %host, delay_ms = delay.as_millis(), "recorded server rate limit");
    }
}

/// Extracts the lowercase host from a URL, or `"unknown"` when it has none.
///
/// ```
/// use registry_mirror::download::rate_limiter::extract_host;
///
/// assert_eq!(extract_host("https://Repo1.Maven.org/maven2/"), "repo1.maven.org");
/// assert_eq!(extract_host("http://127.0.0.1:8080/x"), "127.0.0.1");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Accepts integer seconds (`120`) and HTTP-dates
/// (`Wed, 21 Oct 2025 07:28:00 GMT`). Values above one hour are capped.
///
/// ```
/// use std::time::Duration;
/// use registry_mirror::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(cap_retry_after(Duration::from_secs(seconds)));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, cap_retry_after),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        MAX_RETRY_AFTER
    } else {
        duration
    }
}
