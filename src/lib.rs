//! strm-sync Core Library
//!
//! This library provides the cycle-based synchronization engine behind the
//! `strm-sync` daemon, which polls a content-hosting API, resolves hosted
//! files into direct URLs, and hands them to an output writer that produces
//! local `.strm` reference files.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Paginated, rate-limited API client with backoff
//! - [`registry`] - Persistent TTL registry of written files
//! - [`retry_queue`] - Persistent cross-cycle retry queue
//! - [`sync`] - Cycle orchestrator state machine and scheduler
//! - [`output`] - Output writer seam and the `.strm` implementation
//! - [`filter`] - Media-type filter applied before resolution
//! - [`state`] - Atomic persistence helpers shared by registry and queue
//! - [`config`] - Validated runtime settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod filter;
pub mod output;
pub mod registry;
pub mod retry_queue;
pub mod state;
pub mod sync;
mod user_agent;

// Re-export commonly used types
pub use api::{
    ApiClient, ApiError, BackoffPolicy, ContentSource, ErrorKind, FileEntry, RateLimiter,
    RemoteItem, ResolvedFile,
};
pub use config::{ConfigError, SyncConfig};
pub use filter::{FilterDecision, MediaFilter};
pub use output::{OutputError, OutputMetadata, OutputWriter, StrmWriter};
pub use registry::{FileRegistry, TrackedKey};
pub use retry_queue::{QueueOutcome, RetryItem, RetryPayload, RetryPolicy, RetryQueue};
pub use state::StateError;
pub use sync::{
    CycleError, CycleOrchestrator, CyclePhase, CycleSettings, CycleSummary, Scheduler,
    SchedulerError,
};
