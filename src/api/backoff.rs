//! In-call backoff for throttled and unavailable upstream responses.
//!
//! Two response classes are retried inside a single API call:
//! - HTTP 429 with exponential backoff (`base * 2^(n-1)`)
//! - HTTP 503 and other 5xx after a fixed delay with a little jitter
//!
//! Everything else is decided immediately: success, permanent client errors,
//! and transport failures (which are left to the cross-cycle retry queue).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use strm_sync_core::api::{BackoffPolicy, BackoffReason, RetryDecision};
//!
//! let policy = BackoffPolicy::new(3, 2, Duration::from_secs(2), Duration::from_secs(10));
//!
//! match policy.should_retry(BackoffReason::RateLimited, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(2));
//!         assert_eq!(attempt, 1);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default number of in-call retries after a 429.
pub const DEFAULT_RETRY_429_ATTEMPTS: u32 = 3;

/// Default number of in-call retries after a 503.
pub const DEFAULT_RETRY_503_ATTEMPTS: u32 = 2;

/// Default base delay for 429 backoff (2 seconds).
const DEFAULT_RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default fixed delay before retrying a 503 (10 seconds).
const DEFAULT_SERVER_UNAVAILABLE_DELAY: Duration = Duration::from_secs(10);

/// Upper bound for any single computed backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Jitter on the fixed 503 delay, as a fraction of the delay (10%).
const SERVER_UNAVAILABLE_JITTER_DIVISOR: u32 = 10;

/// Why a response is being retried inside the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffReason {
    /// HTTP 429 Too Many Requests.
    RateLimited,
    /// HTTP 503 Service Unavailable, or any other 5xx.
    ServerUnavailable,
}

/// How a response status is handled by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx. Decode the body.
    Success,
    /// Retry in-call according to the [`BackoffReason`].
    Backoff(BackoffReason),
    /// 4xx other than 429. Permanent.
    ClientError,
}

/// Decision on whether to retry a throttled call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which retry this will be (1-indexed).
        attempt: u32,
    },

    /// Give up and surface the failure.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Per-call retry budget for 429 and 503 responses.
///
/// # Default Values
///
/// - `retry_429_attempts`: 3 (delays of 2s, 4s, 8s)
/// - `retry_503_attempts`: 2 (10s each, plus up to 1s of jitter)
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    retry_429_attempts: u32,
    retry_503_attempts: u32,
    rate_limit_base_delay: Duration,
    server_unavailable_delay: Duration,
    max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retry_429_attempts: DEFAULT_RETRY_429_ATTEMPTS,
            retry_503_attempts: DEFAULT_RETRY_503_ATTEMPTS,
            rate_limit_base_delay: DEFAULT_RATE_LIMIT_BASE_DELAY,
            server_unavailable_delay: DEFAULT_SERVER_UNAVAILABLE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with custom retry counts and delays.
    #[must_use]
    pub fn new(
        retry_429_attempts: u32,
        retry_503_attempts: u32,
        rate_limit_base_delay: Duration,
        server_unavailable_delay: Duration,
    ) -> Self {
        Self {
            retry_429_attempts,
            retry_503_attempts,
            rate_limit_base_delay,
            server_unavailable_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Overrides the cap applied to computed delays.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Returns the configured number of 429 retries.
    #[must_use]
    pub fn retry_429_attempts(&self) -> u32 {
        self.retry_429_attempts
    }

    /// Returns the configured number of 503 retries.
    #[must_use]
    pub fn retry_503_attempts(&self) -> u32 {
        self.retry_503_attempts
    }

    /// Decides whether to retry after `retries_done` retries have already failed.
    #[instrument(skip(self))]
    pub fn should_retry(&self, reason: BackoffReason, retries_done: u32) -> RetryDecision {
        let budget = match reason {
            BackoffReason::RateLimited => self.retry_429_attempts,
            BackoffReason::ServerUnavailable => self.retry_503_attempts,
        };

        if retries_done >= budget {
            debug!(retries_done, budget, "in-call retries exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("{budget} retries exhausted"),
            };
        }

        let attempt = retries_done + 1;
        let delay = match reason {
            BackoffReason::RateLimited => self.rate_limit_delay(attempt),
            BackoffReason::ServerUnavailable => self.server_unavailable_delay_with_jitter(),
        };

        debug!(attempt, delay_ms = delay.as_millis(), "will retry");
        RetryDecision::Retry { delay, attempt }
    }

    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    fn rate_limit_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.rate_limit_base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    fn server_unavailable_delay_with_jitter(&self) -> Duration {
        let base = self.server_unavailable_delay.min(self.max_delay);
        let max_jitter_ms =
            u64::try_from((base / SERVER_UNAVAILABLE_JITTER_DIVISOR).as_millis()).unwrap_or(0);
        if max_jitter_ms == 0 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Classifies an HTTP status code for the client's retry loop.
///
/// | Status | Class |
/// |--------|-------|
/// | 2xx | Success |
/// | 429 | Backoff (rate limited) |
/// | 5xx | Backoff (server unavailable) |
/// | other 4xx | ClientError |
/// | 1xx/3xx | ClientError |
#[must_use]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        429 => StatusClass::Backoff(BackoffReason::RateLimited),
        500..=599 => StatusClass::Backoff(BackoffReason::ServerUnavailable),
        _ => StatusClass::ClientError,
    }
}
