//! Shared rolling-window rate limiting for API requests.
//!
//! This module provides the [`RateLimiter`] struct which admits at most
//! `limit` requests per rolling window and spaces consecutive admissions at
//! least `window / limit` apart, so a burst never drains the whole budget.
//!
//! # Overview
//!
//! The budget is global to the account token, not per endpoint, so a single
//! limiter is shared by `Arc` between pagination and every resolve worker.
//! Admission is serialized: waiters queue on the inner mutex and leave the
//! limiter one at a time.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use strm_sync_core::api::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(200));
//!
//! // First request proceeds immediately
//! limiter.acquire().await;
//!
//! // Second request waits for the 300ms spacing
//! limiter.acquire().await;
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Rolling window the per-minute budget applies to.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Warning threshold for cumulative delay imposed by the server (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Rolling-window rate limiter shared by all API callers.
///
/// `RateLimiter` is `Send + Sync`; wrap it in `Arc` and clone the `Arc` into
/// spawned tasks.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum admissions per window.
    limit: u32,

    /// Length of the rolling window.
    window: Duration,

    /// Minimum gap between two admissions (`window / limit`).
    spacing: Duration,

    /// Whether rate limiting is disabled.
    disabled: bool,

    /// Admission timestamps still inside the window, oldest first.
    /// Held across the wait so admission stays serialized.
    admitted: Mutex<VecDeque<Instant>>,

    /// Cumulative server-mandated delay in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit_per_minute` requests per rolling minute.
    ///
    /// A limit of zero yields a disabled limiter.
    #[must_use]
    pub fn new(limit_per_minute: u32) -> Self {
        Self::with_window(limit_per_minute, DEFAULT_WINDOW)
    }

    /// Creates a limiter admitting `limit` requests per custom `window`.
    #[must_use]
    #[instrument(skip_all, fields(limit, window_ms = window.as_millis()))]
    pub fn with_window(limit: u32, window: Duration) -> Self {
        if limit == 0 {
            return Self::disabled();
        }
        debug!("creating rate limiter");
        Self {
            limit,
            window,
            spacing: window / limit,
            disabled: false,
            admitted: Mutex::new(VecDeque::with_capacity(limit as usize)),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            limit: 0,
            window: Duration::ZERO,
            spacing: Duration::ZERO,
            disabled: true,
            admitted: Mutex::new(VecDeque::new()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the admission budget per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns the minimum gap enforced between admissions.
    #[must_use]
    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Waits until a request may be sent, then records the admission.
    ///
    /// The first request proceeds immediately. Dropping the returned future
    /// while it waits gives up the place in line without consuming budget.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            while admitted
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
            {
                admitted.pop_front();
            }

            let spacing_wait = admitted
                .back()
                .map_or(Duration::ZERO, |last| {
                    self.spacing.saturating_sub(now.duration_since(*last))
                });

            let window_wait = if admitted.len() >= self.limit as usize {
                admitted.front().map_or(Duration::ZERO, |oldest| {
                    self.window.saturating_sub(now.duration_since(*oldest))
                })
            } else {
                Duration::ZERO
            };

            let wait = spacing_wait.max(window_wait);
            if wait.is_zero() {
                break;
            }

            debug!(
                wait_ms = wait.as_millis(),
                in_window = admitted.len(),
                "applying rate limit delay"
            );
            tokio::time::sleep(wait).await;
        }

        admitted.push_back(Instant::now());
    }

    /// Records a server-mandated delay (429 backoff or Retry-After).
    ///
    /// The limiter does not change its budget; a warning is logged once the
    /// cumulative delay suggests the configured rate is too high.
    #[instrument(skip(self))]
    pub fn record_rate_limit(&self, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let total_ms = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            .saturating_add(delay_ms);
        let cumulative = Duration::from_millis(total_ms);

        debug!(
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                limit = self.limit,
                "excessive server rate limiting - consider lowering RATE_LIMIT_PER_MINUTE"
            );
        }
    }

    /// Returns the cumulative server-mandated delay recorded so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use strm_sync_core::api::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };

        let duration = Duration::from_secs(seconds);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After date exceeds maximum, capping at 1 hour"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    // ==================== RateLimiter Tests ====================

    #[test]
    fn test_rate_limiter_new_derives_spacing() {
        let limiter = RateLimiter::new(200);
        assert_eq!(limiter.limit(), 200);
        assert_eq!(limiter.spacing(), Duration::from_millis(300));
        assert!(!limiter.is_disabled());
    }

    #[test]
    fn test_rate_limiter_zero_limit_is_disabled() {
        let limiter = RateLimiter::new(0);
        assert!(limiter.is_disabled());
        assert_eq!(limiter.spacing(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_rate_limiter_first_request_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::new(60);
        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_rate_limiter_second_acquire_pending_until_spacing() {
        tokio::time::pause();

        let limiter = RateLimiter::with_window(2, Duration::from_secs(1));
        limiter.acquire().await;

        let mut second = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(second.poll());

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio_test::assert_ready!(second.poll());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_consecutive_admissions() {
        tokio::time::pause();

        // 60 per minute -> one per second
        let limiter = RateLimiter::new(60);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_rate_limiter_no_delay_after_idle_gap() {
        tokio::time::pause();

        let limiter = RateLimiter::new(60);
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_rate_limiter_never_exceeds_budget_per_window() {
        tokio::time::pause();

        let window = Duration::from_secs(60);
        let limiter = Arc::new(RateLimiter::with_window(5, window));
        let admissions = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            let admissions = Arc::clone(&admissions);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                admissions.lock().unwrap().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = admissions.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 12);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < window)
                .count();
            assert!(in_window <= 5, "{in_window} admissions inside one window");
        }
    }

    #[tokio::test]
    async fn test_rate_limiter_cancelled_wait_does_not_consume_budget() {
        tokio::time::pause();

        let limiter = RateLimiter::new(60);
        limiter.acquire().await;

        // Give up while waiting for spacing
        let timed_out =
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(timed_out.is_err());
        assert_eq!(limiter.admitted.lock().await.len(), 1);
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_negative() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("invalid"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_whitespace() {
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_retry_after("3600"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }

    // ==================== record_rate_limit Tests ====================

    #[test]
    fn test_record_rate_limit_tracks_cumulative() {
        let limiter = RateLimiter::new(200);

        limiter.record_rate_limit(Duration::from_secs(5));
        limiter.record_rate_limit(Duration::from_secs(10));

        assert_eq!(limiter.cumulative_delay(), Duration::from_secs(15));
    }
}
