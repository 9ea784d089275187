//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use strm_sync_core::SyncConfig;
use strm_sync_core::api::{DEFAULT_RETRY_429_ATTEMPTS, DEFAULT_RETRY_503_ATTEMPTS};
use strm_sync_core::config::{
    DEFAULT_API_BASE_URL, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_CYCLE_INTERVAL_MINUTES,
    DEFAULT_FILE_EXPIRY_DAYS, DEFAULT_MAX_PERSISTENCE_FAILURES, DEFAULT_RATE_LIMIT_PER_MINUTE,
};
use strm_sync_core::filter::DEFAULT_MIN_VIDEO_SIZE_MB;

/// Keep a media library of `.strm` files in sync with a hosted download account.
///
/// Every cycle lists the account, resolves new or expired files into direct
/// links and writes one `.strm` file per video or subtitle.
#[derive(Parser, Debug)]
#[command(name = "strm-sync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// API token of the hosting account
    #[arg(long, env = "REAL_DEBRID_API_KEY", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Base URL of the content API
    #[arg(long, env = "API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Root directory for generated .strm files
    #[arg(long, env = "MEDIA_PATH", default_value = "/media")]
    pub media_dir: PathBuf,

    /// Directory for the file registry and retry queue
    #[arg(long, env = "STATE_DIR", default_value = "/app/output")]
    pub state_dir: PathBuf,

    /// Minutes between the end of one cycle and the start of the next (1-1440)
    #[arg(long, env = "CYCLE_INTERVAL_MINUTES", default_value_t = DEFAULT_CYCLE_INTERVAL_MINUTES, value_parser = clap::value_parser!(u64).range(1..=1440))]
    pub cycle_interval_minutes: u64,

    /// Days before a written file is resolved again (1-3650)
    #[arg(long, env = "FILE_EXPIRY_DAYS", default_value_t = DEFAULT_FILE_EXPIRY_DAYS, value_parser = clap::value_parser!(u32).range(1..=3650))]
    pub file_expiry_days: u32,

    /// In-call retries after HTTP 503 (0-10)
    #[arg(long = "retry-503-attempts", env = "RETRY_503_ATTEMPTS", default_value_t = DEFAULT_RETRY_503_ATTEMPTS, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retry_503_attempts: u32,

    /// In-call retries after HTTP 429 (0-10)
    #[arg(long = "retry-429-attempts", env = "RETRY_429_ATTEMPTS", default_value_t = DEFAULT_RETRY_429_ATTEMPTS, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retry_429_attempts: u32,

    /// Requests admitted per rolling minute (1-240)
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value_t = DEFAULT_RATE_LIMIT_PER_MINUTE, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub rate_limit_per_minute: u32,

    /// Resolve calls in flight (1-10)
    #[arg(long, env = "CONCURRENCY_LIMIT", default_value_t = DEFAULT_CONCURRENCY_LIMIT as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub concurrency_limit: u8,

    /// Cycles a queued file may fail before it is dropped (unlimited if unset)
    #[arg(long, env = "RETRY_QUEUE_MAX_ATTEMPTS", value_parser = clap::value_parser!(u32).range(1..))]
    pub retry_queue_max_attempts: Option<u32>,

    /// Consecutive cycles allowed to fail saving state before exiting (1-1000)
    #[arg(long, env = "MAX_PERSISTENCE_FAILURES", default_value_t = DEFAULT_MAX_PERSISTENCE_FAILURES, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub max_persistence_failures: u32,

    /// Smallest video accepted, in MiB (0 accepts all)
    #[arg(long, env = "MIN_VIDEO_SIZE_MB", default_value_t = DEFAULT_MIN_VIDEO_SIZE_MB)]
    pub min_video_size_mb: u64,

    /// Keep registry entries for files no longer listed upstream
    #[arg(long, env = "NO_PURGE_ORPHANS")]
    pub no_purge_orphans: bool,
}

impl Args {
    /// Builds the engine configuration. Validation happens separately.
    #[must_use]
    pub fn to_config(&self) -> SyncConfig {
        SyncConfig {
            api_token: self.api_token.clone().unwrap_or_default(),
            api_base_url: self.api_base_url.clone(),
            media_dir: self.media_dir.clone(),
            state_dir: self.state_dir.clone(),
            cycle_interval: Duration::from_secs(self.cycle_interval_minutes * 60),
            file_expiry_days: self.file_expiry_days,
            retry_429_attempts: self.retry_429_attempts,
            retry_503_attempts: self.retry_503_attempts,
            rate_limit_per_minute: self.rate_limit_per_minute,
            concurrency_limit: usize::from(self.concurrency_limit),
            retry_queue_max_attempts: self.retry_queue_max_attempts,
            max_consecutive_persistence_failures: self.max_persistence_failures,
            min_video_size_mb: self.min_video_size_mb,
            purge_orphans: !self.no_purge_orphans,
            ..SyncConfig::default()
        }
    }
}
