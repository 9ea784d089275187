use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::orchestrator::{CycleError, CycleOrchestrator};
use super::phase::CyclePhase;

/// Error that ends the scheduler loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// State could not be saved for too many cycles in a row.
    #[error("state could not be persisted for {failures} consecutive cycles: {last}")]
    PersistenceExhausted {
        /// Consecutive failed cycles.
        failures: u32,
        /// Error of the last failed cycle.
        #[source]
        last: CycleError,
    },
}

/// Runs cycles back to back with a sleep in between, until shutdown.
pub struct Scheduler {
    orchestrator: CycleOrchestrator,
    interval: Duration,
    max_consecutive_failures: u32,
}

impl Scheduler {
    /// Creates a scheduler. `max_consecutive_failures` is clamped to at least 1.
    #[must_use]
    pub fn new(
        orchestrator: CycleOrchestrator,
        interval: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            orchestrator,
            interval,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// The wrapped orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &CycleOrchestrator {
        &self.orchestrator
    }

    /// Runs until `cancel` fires. Returns the number of cycles run.
    ///
    /// A cycle that fails to persist state is retried at the next interval;
    /// the loop gives up once failures reach the configured limit.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::PersistenceExhausted`] after too many
    /// consecutive persistence failures.
    #[instrument(skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<u64, SchedulerError> {
        let mut cycles_run: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            let outcome = self.orchestrator.run_cycle(cancel).await;
            cycles_run += 1;

            match outcome {
                Ok(_) => consecutive_failures = 0,
                Err(last) => {
                    consecutive_failures += 1;
                    error!(
                        error = %last,
                        consecutive_failures,
                        max = self.max_consecutive_failures,
                        "cycle failed"
                    );
                    if consecutive_failures >= self.max_consecutive_failures {
                        return Err(SchedulerError::PersistenceExhausted {
                            failures: consecutive_failures,
                            last,
                        });
                    }
                }
            }

            if cancel.is_cancelled() {
                info!(cycles_run, "shutdown requested, scheduler stopping");
                return Ok(cycles_run);
            }

            self.orchestrator.enter(CyclePhase::Sleep);
            info!(
                next_in_secs = self.interval.as_secs(),
                "sleeping until next cycle"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.orchestrator.enter(CyclePhase::Idle);
                    info!(cycles_run, "shutdown requested during sleep, scheduler stopping");
                    return Ok(cycles_run);
                }
                () = tokio::time::sleep(self.interval) => {}
            }
            self.orchestrator.enter(CyclePhase::Idle);
        }
    }
}
