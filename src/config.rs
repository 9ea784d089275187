//! Validated runtime settings for a sync run.
//!
//! The binary builds a [`SyncConfig`] from CLI flags and environment
//! variables; library users can construct one directly. [`SyncConfig::validate`]
//! enforces the ranges the engine relies on, and the helper methods derive
//! the component-level settings from it.

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

use crate::api::{
    BackoffPolicy, DEFAULT_RETRY_429_ATTEMPTS, DEFAULT_RETRY_503_ATTEMPTS, validate_base_url,
};
use crate::filter::{DEFAULT_MIN_VIDEO_SIZE_MB, MediaFilter};
use crate::retry_queue::RetryPolicy;
use crate::sync::CycleSettings;

/// Default API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

/// Default cycle interval in minutes.
pub const DEFAULT_CYCLE_INTERVAL_MINUTES: u64 = 20;

/// Default registry expiry in days.
pub const DEFAULT_FILE_EXPIRY_DAYS: u32 = 14;

/// Default request budget per rolling minute.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 200;

/// Hard upper bound on the request budget.
pub const MAX_RATE_LIMIT_PER_MINUTE: u32 = 240;

/// Default number of resolve calls in flight.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Hard upper bound on resolve calls in flight.
pub const MAX_CONCURRENCY_LIMIT: usize = 10;

/// Default consecutive persistence failures tolerated before exiting.
pub const DEFAULT_MAX_PERSISTENCE_FAILURES: u32 = 3;

/// Registry file name inside the state directory.
pub const REGISTRY_FILE_NAME: &str = "file_registry.json";

/// Retry queue file name inside the state directory.
pub const RETRY_QUEUE_FILE_NAME: &str = "retry_queue.json";

/// Characters of the token shown in logs.
const TOKEN_VISIBLE_PREFIX: usize = 4;

/// Errors raised by [`SyncConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No API token was provided.
    #[error("API token is required (set REAL_DEBRID_API_KEY or pass --api-token)")]
    MissingToken,

    /// A numeric setting is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Provided value.
        value: u64,
        /// Inclusive minimum.
        min: u64,
        /// Inclusive maximum.
        max: u64,
    },

    /// Base URL is not an absolute http(s) URL.
    #[error("invalid API base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// All settings of a sync run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bearer token for the content API.
    pub api_token: String,
    /// Base URL of the content API.
    pub api_base_url: String,
    /// Root directory for `.strm` output.
    pub media_dir: PathBuf,
    /// Directory holding the registry and retry queue files.
    pub state_dir: PathBuf,
    /// Wait between the end of one cycle and the start of the next.
    pub cycle_interval: Duration,
    /// Age after which a written file is resolved again.
    pub file_expiry_days: u32,
    /// In-call retries after HTTP 429.
    pub retry_429_attempts: u32,
    /// In-call retries after HTTP 503.
    pub retry_503_attempts: u32,
    /// First 429 backoff delay; doubles on each retry.
    pub rate_limit_base_delay: Duration,
    /// Fixed delay before retrying a 503.
    pub server_unavailable_delay: Duration,
    /// Requests admitted per rolling minute.
    pub rate_limit_per_minute: u32,
    /// Resolve calls in flight.
    pub concurrency_limit: usize,
    /// Cross-cycle attempt ceiling for queued items; `None` is unlimited.
    pub retry_queue_max_attempts: Option<u32>,
    /// Consecutive persistence failures tolerated before exiting.
    pub max_consecutive_persistence_failures: u32,
    /// Video size floor in MiB.
    pub min_video_size_mb: u64,
    /// Drop registry entries for files upstream no longer lists.
    pub purge_orphans: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            media_dir: PathBuf::from("/media"),
            state_dir: PathBuf::from("/app/output"),
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_MINUTES * 60),
            file_expiry_days: DEFAULT_FILE_EXPIRY_DAYS,
            retry_429_attempts: DEFAULT_RETRY_429_ATTEMPTS,
            retry_503_attempts: DEFAULT_RETRY_503_ATTEMPTS,
            rate_limit_base_delay: Duration::from_secs(2),
            server_unavailable_delay: Duration::from_secs(10),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            retry_queue_max_attempts: None,
            max_consecutive_persistence_failures: DEFAULT_MAX_PERSISTENCE_FAILURES,
            min_video_size_mb: DEFAULT_MIN_VIDEO_SIZE_MB,
            purge_orphans: true,
        }
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

impl SyncConfig {
    /// Checks every setting the engine depends on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        validate_base_url(&self.api_base_url).map_err(|reason| ConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason,
        })?;

        check_range(
            "rate_limit_per_minute",
            u64::from(self.rate_limit_per_minute),
            1,
            u64::from(MAX_RATE_LIMIT_PER_MINUTE),
        )?;
        check_range(
            "concurrency_limit",
            self.concurrency_limit as u64,
            1,
            MAX_CONCURRENCY_LIMIT as u64,
        )?;
        check_range(
            "file_expiry_days",
            u64::from(self.file_expiry_days),
            1,
            3650,
        )?;
        check_range(
            "cycle_interval_minutes",
            self.cycle_interval.as_secs() / 60,
            1,
            24 * 60,
        )?;
        check_range(
            "max_consecutive_persistence_failures",
            u64::from(self.max_consecutive_persistence_failures),
            1,
            1000,
        )?;
        if let Some(max) = self.retry_queue_max_attempts {
            check_range("retry_queue_max_attempts", u64::from(max), 1, u64::from(u32::MAX))?;
        }
        Ok(())
    }

    /// Path of the registry file.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join(REGISTRY_FILE_NAME)
    }

    /// Path of the retry queue file.
    #[must_use]
    pub fn retry_queue_path(&self) -> PathBuf {
        self.state_dir.join(RETRY_QUEUE_FILE_NAME)
    }

    /// Registry expiry as a chrono delta.
    #[must_use]
    pub fn file_expiry(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.file_expiry_days))
    }

    /// In-call backoff settings for the API client.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.retry_429_attempts,
            self.retry_503_attempts,
            self.rate_limit_base_delay,
            self.server_unavailable_delay,
        )
    }

    /// Cross-cycle ceilings for the retry queue.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::uniform(self.retry_queue_max_attempts)
    }

    /// Media filter with the configured video floor.
    #[must_use]
    pub fn media_filter(&self) -> MediaFilter {
        MediaFilter::new(self.min_video_size_mb)
    }

    /// Per-cycle orchestrator settings.
    #[must_use]
    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            concurrency_limit: self.concurrency_limit,
            file_expiry: self.file_expiry(),
            purge_orphans: self.purge_orphans,
        }
    }

    /// The API token with all but a short prefix hidden, for logging.
    #[must_use]
    pub fn masked_token(&self) -> String {
        let visible: String = self.api_token.chars().take(TOKEN_VISIBLE_PREFIX).collect();
        if self.api_token.chars().count() <= TOKEN_VISIBLE_PREFIX * 2 {
            return "****".to_string();
        }
        format!("{visible}****")
    }
}
