//! The cycle engine.
//!
//! [`CycleOrchestrator`] runs one cycle:
//!
//! ```text
//! Idle -> DrainRetryQueue -> FetchNew -> Filter -> Delegate -> UpdateState -> Idle
//! ```
//!
//! [`Scheduler`] repeats cycles with a `Sleep` phase in between and stops on
//! shutdown or after repeated persistence failures.

mod orchestrator;
mod phase;
mod scheduler;
mod summary;

pub use orchestrator::{CycleError, CycleOrchestrator, CycleSettings};
pub use phase::CyclePhase;
pub use scheduler::{Scheduler, SchedulerError};
pub use summary::CycleSummary;
