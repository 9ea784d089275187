use std::fmt;

/// States a cycle moves through, in order.
///
/// `Sleep` is entered by the [`Scheduler`](super::Scheduler) between cycles;
/// a single [`run_cycle`](super::CycleOrchestrator::run_cycle) call goes from
/// `Idle` to `UpdateState` and back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Between cycles.
    Idle,
    /// Retrying work queued by earlier cycles.
    DrainRetryQueue,
    /// Listing remote items.
    FetchNew,
    /// Deduplicating and skipping fresh or unwanted files.
    Filter,
    /// Resolving links and handing URLs to the output writer.
    Delegate,
    /// Purging orphans and saving state.
    UpdateState,
    /// Waiting for the next cycle.
    Sleep,
}

impl CyclePhase {
    /// Returns the phase name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DrainRetryQueue => "drain_retry_queue",
            Self::FetchNew => "fetch_new",
            Self::Filter => "filter",
            Self::Delegate => "delegate",
            Self::UpdateState => "update_state",
            Self::Sleep => "sleep",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
