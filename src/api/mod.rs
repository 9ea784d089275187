//! Content API client: pagination, link resolution, rate limiting and backoff.
//!
//! # Architecture
//!
//! - [`ApiClient`] - reqwest client for the listing and resolution endpoints
//! - [`ContentSource`] - async trait the orchestrator depends on
//! - [`RateLimiter`] - rolling-window budget shared by every request
//! - [`BackoffPolicy`] - in-call retry budget for 429 and 5xx responses
//! - [`ApiError`] / [`ErrorKind`] - failures and their closed classification

mod backoff;
mod client;
mod error;
mod rate_limiter;
mod source;
mod types;

pub use backoff::{
    BackoffPolicy, BackoffReason, DEFAULT_RETRY_429_ATTEMPTS, DEFAULT_RETRY_503_ATTEMPTS,
    RetryDecision, StatusClass, classify_status,
};
pub use client::{ApiClient, ClientBuildError, MAX_PAGES, PAGE_SIZE};
pub(crate) use client::validate_base_url;
pub use error::{ApiError, ErrorKind};
pub use rate_limiter::{RateLimiter, parse_retry_after};
pub use source::ContentSource;
pub use types::{FileEntry, RemoteItem, ResolvedFile, STATUS_DOWNLOADED};
pub(crate) use types::file_extension;
