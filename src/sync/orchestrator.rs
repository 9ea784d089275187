use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::phase::CyclePhase;
use super::summary::CycleSummary;
use crate::api::{ApiError, ContentSource, ErrorKind, ResolvedFile};
use crate::config::{DEFAULT_CONCURRENCY_LIMIT, DEFAULT_FILE_EXPIRY_DAYS};
use crate::filter::{FilterDecision, MediaFilter};
use crate::output::{OutputMetadata, OutputWriter, clashing_outputs};
use crate::registry::{FileRegistry, TrackedKey};
use crate::retry_queue::{QueueOutcome, RetryPayload, RetryQueue};
use crate::state::StateError;

/// Error that fails a whole cycle.
///
/// Per-file failures never surface here; they are counted in the
/// [`CycleSummary`] and routed to the retry queue.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Registry or retry queue could not be saved.
    #[error("failed to persist cycle state: {0}")]
    Persistence(#[from] StateError),
}

/// Per-cycle knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Resolve calls in flight.
    pub concurrency_limit: usize,
    /// Age after which a written file is resolved again.
    pub file_expiry: TimeDelta,
    /// Drop registry entries for files upstream no longer lists.
    pub purge_orphans: bool,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            file_expiry: TimeDelta::days(i64::from(DEFAULT_FILE_EXPIRY_DAYS)),
            purge_orphans: true,
        }
    }
}

/// Where a unit of work came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Listed by this cycle's fetch.
    Listing,
    /// Drained from the retry queue; carries the kind it was queued with.
    Queued(ErrorKind),
}

#[derive(Debug, Clone)]
struct WorkUnit {
    key: TrackedKey,
    payload: RetryPayload,
    origin: Origin,
}

/// What the fetch phase produced.
#[derive(Debug, Default)]
struct FetchOutcome {
    /// Files of ready items, in listing order.
    files: Vec<WorkUnit>,
    /// Every key upstream still lists, ready or not.
    live_keys: HashSet<TrackedKey>,
    /// True when the listing ended normally.
    complete: bool,
}

/// Drives one synchronization cycle at a time.
///
/// Owns the registry and the retry queue; they are only mutated here, on the
/// control task, after worker results are joined.
pub struct CycleOrchestrator {
    source: Arc<dyn ContentSource>,
    writer: Arc<dyn OutputWriter>,
    filter: MediaFilter,
    registry: FileRegistry,
    queue: RetryQueue,
    settings: CycleSettings,
    cycle: u64,
    phase: CyclePhase,
}

impl CycleOrchestrator {
    /// Creates an orchestrator over already loaded state.
    ///
    /// Cycle numbering resumes after the highest cycle recorded in the queue.
    #[must_use]
    pub fn new(
        source: Arc<dyn ContentSource>,
        writer: Arc<dyn OutputWriter>,
        filter: MediaFilter,
        registry: FileRegistry,
        queue: RetryQueue,
        settings: CycleSettings,
    ) -> Self {
        let cycle = queue.last_cycle();
        Self {
            source,
            writer,
            filter,
            registry,
            queue,
            settings,
            cycle,
            phase: CyclePhase::Idle,
        }
    }

    /// Number of the last cycle started.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// The file registry.
    #[must_use]
    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// The retry queue.
    #[must_use]
    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub(crate) fn enter(&mut self, phase: CyclePhase) {
        debug!(cycle = self.cycle, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    /// Runs one full cycle.
    ///
    /// Cancellation stops new work from starting; in-flight calls finish
    /// and state is always saved before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError::Persistence`] if the registry or the retry queue
    /// could not be saved. Both saves are always attempted.
    #[instrument(skip_all, fields(cycle = self.cycle + 1))]
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleSummary, CycleError> {
        self.cycle += 1;
        let cycle = self.cycle;
        let now = Utc::now();
        let expiry = self.settings.file_expiry;
        let mut summary = CycleSummary {
            cycle,
            ..CycleSummary::default()
        };

        info!(
            cycle,
            tracked = self.registry.len(),
            queued = self.queue.len(),
            stale = self.registry.stale_count(now, expiry),
            "starting cycle"
        );

        self.enter(CyclePhase::DrainRetryQueue);
        let drained_keys = if cancel.is_cancelled() {
            HashSet::new()
        } else {
            self.drain_retry_queue(cycle, cancel, &mut summary).await
        };

        self.enter(CyclePhase::FetchNew);
        let fetch = if cancel.is_cancelled() {
            info!("shutdown requested, skipping fetch");
            FetchOutcome::default()
        } else {
            self.fetch(cancel).await
        };

        self.enter(CyclePhase::Filter);
        let pending = self.filter_new(fetch.files, &drained_keys, &mut summary);

        self.enter(CyclePhase::Delegate);
        if !pending.is_empty() {
            let results = self.resolve_all(pending, cancel).await;
            for (unit, result) in results {
                self.handle_resolution(unit, result, cycle, &mut summary);
            }
        }

        self.enter(CyclePhase::UpdateState);
        summary.fetch_complete = fetch.complete;
        if self.settings.purge_orphans {
            if fetch.complete && !fetch.live_keys.is_empty() {
                let mut keep = fetch.live_keys;
                keep.extend(self.queue.keys().cloned());
                summary.purged = self.registry.purge_orphans(&keep);
                if summary.purged > 0 {
                    info!(purged = summary.purged, "purged registry entries no longer listed");
                }
            } else {
                debug!(
                    complete = fetch.complete,
                    "listing incomplete or empty, skipping orphan purge"
                );
            }
        }

        let registry_saved = self.registry.save();
        let queue_saved = self.queue.save();
        self.enter(CyclePhase::Idle);

        if let Err(error) = &registry_saved {
            warn!(%error, "failed to save file registry");
        }
        if let Err(error) = &queue_saved {
            warn!(%error, "failed to save retry queue");
        }
        registry_saved?;
        queue_saved?;

        summary.log();
        Ok(summary)
    }

    /// Retries queued items. Returns every key the drain took responsibility for.
    async fn drain_retry_queue(
        &mut self,
        cycle: u64,
        cancel: &CancellationToken,
        summary: &mut CycleSummary,
    ) -> HashSet<TrackedKey> {
        summary.permanent_failures += self.queue.prune_exhausted().len();

        let due = self.queue.drain(cycle);
        if due.is_empty() {
            return HashSet::new();
        }
        info!(due = due.len(), "retrying queued items");

        let keys: HashSet<TrackedKey> = due.iter().map(|item| item.key.clone()).collect();
        let units = due
            .into_iter()
            .map(|item| WorkUnit {
                key: item.key,
                payload: item.payload,
                origin: Origin::Queued(item.error_kind),
            })
            .collect();

        let results = self.resolve_all(units, cancel).await;
        for (unit, result) in results {
            self.handle_resolution(unit, result, cycle, summary);
        }
        keys
    }

    /// Consumes the listing stream into work units.
    async fn fetch(&self, cancel: &CancellationToken) -> FetchOutcome {
        let mut outcome = FetchOutcome {
            complete: true,
            ..FetchOutcome::default()
        };
        let mut not_ready = 0_usize;
        let mut items = self.source.fetch_all_pages(cancel.clone());

        while let Some(next) = items.next().await {
            let item = match next {
                Ok(item) => item,
                Err(error) => {
                    warn!(%error, "listing failed, continuing with items fetched so far");
                    outcome.complete = false;
                    continue;
                }
            };

            let ready = item.is_downloaded();
            if !ready {
                not_ready += 1;
                debug!(id = %item.id, status = %item.status, "item not ready upstream");
            }
            let paths: Vec<&str> = item
                .files
                .iter()
                .map(|entry| entry.relative_path.as_str())
                .collect();
            let clashing = clashing_outputs(&paths);
            for (index, entry) in item.files.into_iter().enumerate() {
                let key = TrackedKey::from_parts(&item.filename, &entry.relative_path);
                outcome.live_keys.insert(key.clone());
                if ready {
                    let keep_extension = clashing.contains(&index);
                    if keep_extension {
                        debug!(%key, "output name taken by a sibling, keeping extension");
                    }
                    outcome.files.push(WorkUnit {
                        key,
                        payload: RetryPayload {
                            item_id: item.id.clone(),
                            container: item.filename.clone(),
                            entry,
                            keep_extension,
                        },
                        origin: Origin::Listing,
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            outcome.complete = false;
        }
        info!(
            files = outcome.files.len(),
            not_ready,
            complete = outcome.complete,
            "listing finished"
        );
        outcome
    }

    fn filter_new(
        &self,
        files: Vec<WorkUnit>,
        drained_keys: &HashSet<TrackedKey>,
        summary: &mut CycleSummary,
    ) -> Vec<WorkUnit> {
        let now = Utc::now();
        let mut seen = HashSet::with_capacity(files.len());
        let mut pending = Vec::new();

        for unit in files {
            if !seen.insert(unit.key.clone()) {
                debug!(key = %unit.key, "duplicate key in listing, ignored");
                continue;
            }
            summary.fetched += 1;

            if let FilterDecision::Reject(reason) = self.filter.evaluate(&unit.payload.entry) {
                debug!(key = %unit.key, %reason, "filtered");
                summary.filtered += 1;
                continue;
            }
            if drained_keys.contains(&unit.key) || self.queue.contains(&unit.key) {
                summary.deferred += 1;
                continue;
            }
            if self
                .registry
                .is_fresh(&unit.key, now, self.settings.file_expiry)
            {
                summary.skipped += 1;
                continue;
            }
            pending.push(unit);
        }

        debug!(
            pending = pending.len(),
            skipped = summary.skipped,
            filtered = summary.filtered,
            deferred = summary.deferred,
            "filter complete"
        );
        pending
    }

    /// Resolves units on a bounded worker pool.
    ///
    /// Stops admitting new units once `cancel` fires; units never started are
    /// not returned.
    async fn resolve_all(
        &self,
        units: Vec<WorkUnit>,
        cancel: &CancellationToken,
    ) -> Vec<(WorkUnit, Result<ResolvedFile, ApiError>)> {
        let total = units.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency_limit.max(1)));
        let mut handles = Vec::with_capacity(total);

        for (index, unit) in units.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(not_started = total - index, "shutdown requested, not starting further resolutions");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let source = Arc::clone(&self.source);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = source.resolve(&unit.payload.entry, &cancel).await;
                (unit, result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(pair) => results.push(pair),
                Err(error) => warn!(%error, "resolve task panicked"),
            }
        }
        results
    }

    fn handle_resolution(
        &mut self,
        unit: WorkUnit,
        result: Result<ResolvedFile, ApiError>,
        cycle: u64,
        summary: &mut CycleSummary,
    ) {
        let resolved = match result {
            Ok(resolved) => resolved,
            Err(error) if error.is_cancelled() => {
                debug!(key = %unit.key, "interrupted by shutdown, left for next cycle");
                return;
            }
            Err(error) => {
                let kind = error.kind();
                if kind.is_transient() {
                    self.record_transient(unit, kind, &error.to_string(), cycle, summary);
                } else {
                    warn!(key = %unit.key, %error, "permanent failure");
                    summary.permanent_failures += 1;
                    if let Origin::Queued(_) = unit.origin {
                        self.queue.ack(&unit.key);
                    }
                }
                return;
            }
        };

        let entry = &unit.payload.entry;
        if self.filter.evaluate(entry) == FilterDecision::Undetermined {
            if let FilterDecision::Reject(reason) = self.filter.evaluate_resolved(&resolved) {
                debug!(key = %unit.key, %reason, "filtered after resolution");
                summary.filtered += 1;
                if let Origin::Queued(_) = unit.origin {
                    self.queue.ack(&unit.key);
                }
                return;
            }
        }

        let metadata = OutputMetadata {
            container: unit.payload.container.clone(),
            relative_path: entry.relative_path.clone(),
            filename: resolved.filename.clone(),
            keep_extension: unit.payload.keep_extension,
        };

        match self.writer.write(&unit.key, &resolved.url, &metadata) {
            Ok(path) => {
                debug!(key = %unit.key, path = %path.display(), "output written");
                self.registry.record(unit.key.clone(), Utc::now());
                summary.written += 1;
                if let Origin::Queued(kind) = unit.origin {
                    self.queue.ack(&unit.key);
                    summary.recovered += 1;
                    info!(key = %unit.key, %kind, "queued item recovered");
                }
            }
            Err(error) => {
                let message = error.to_string();
                self.record_transient(
                    unit,
                    ErrorKind::TransientWriteFailure,
                    &message,
                    cycle,
                    summary,
                );
            }
        }
    }

    fn record_transient(
        &mut self,
        unit: WorkUnit,
        kind: ErrorKind,
        message: &str,
        cycle: u64,
        summary: &mut CycleSummary,
    ) {
        let requeued = match unit.origin {
            Origin::Queued(previous) if previous == kind => {
                self.queue.requeue(&unit.key, cycle, message)
            }
            _ => None,
        };
        let key = unit.key.clone();
        let outcome = match requeued {
            Some(outcome) => outcome,
            None => self
                .queue
                .enqueue(unit.key, kind, unit.payload, cycle, message),
        };

        match outcome {
            QueueOutcome::Queued { attempts } => {
                summary.retried += 1;
                info!(key = %key, %kind, attempts, error = message, "queued for retry");
            }
            QueueOutcome::Dropped(_) | QueueOutcome::Rejected => {
                summary.permanent_failures += 1;
            }
        }
    }
}
