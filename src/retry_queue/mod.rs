//! Persistent cross-cycle queue of transiently failed work.
//!
//! A file whose resolution or write fails with a transient [`ErrorKind`] is
//! queued here and retried at the start of the next cycle, before any new
//! listing is fetched. Attempts are counted per kind: when an item fails
//! again with a different kind its counter restarts at 1.
//!
//! Items are never removed by [`RetryQueue::drain`]; they stay stored until
//! [`ack`](RetryQueue::ack) or [`requeue`](RetryQueue::requeue) settles them,
//! so a crash mid-cycle loses nothing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::api::{ErrorKind, FileEntry};
use crate::registry::TrackedKey;
use crate::state::{self, LoadOutcome, StateError};

/// Default interval between "still retrying" warnings for unlimited kinds.
const DEFAULT_WARN_EVERY: u32 = 10;

/// What is needed to re-run a failed resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPayload {
    /// Upstream item identifier.
    pub item_id: String,
    /// Container name the file belongs to.
    pub container: String,
    /// The file to resolve.
    pub entry: FileEntry,
    /// Output name keeps the video extension (a sibling owns the plain name).
    #[serde(default)]
    pub keep_extension: bool,
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryItem {
    /// Identity of the output file.
    pub key: TrackedKey,
    /// Kind of the most recent failure.
    pub error_kind: ErrorKind,
    /// Consecutive failures of `error_kind`.
    pub attempts: u32,
    /// Cycle in which the item was first queued.
    pub enqueued_cycle: u64,
    /// Cycle of the most recent failure.
    #[serde(default)]
    pub last_failed_cycle: u64,
    /// Data needed to retry.
    pub payload: RetryPayload,
    /// Message of the most recent failure.
    #[serde(default)]
    pub last_error: String,
}

/// Per-kind ceilings on cross-cycle attempts.
///
/// `None` means unlimited: the item is retried every cycle until it succeeds
/// or upstream stops listing it, with a warning every `warn_every` attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    rate_limited: Option<u32>,
    server_unavailable: Option<u32>,
    network: Option<u32>,
    write_failure: Option<u32>,
    warn_every: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limited: None,
            server_unavailable: None,
            network: None,
            write_failure: None,
            warn_every: DEFAULT_WARN_EVERY,
        }
    }
}

impl RetryPolicy {
    /// Applies the same ceiling to every transient kind.
    #[must_use]
    pub fn uniform(max_attempts: Option<u32>) -> Self {
        Self {
            rate_limited: max_attempts,
            server_unavailable: max_attempts,
            network: max_attempts,
            write_failure: max_attempts,
            ..Self::default()
        }
    }

    /// Overrides the ceiling for one kind.
    #[must_use]
    pub fn with_ceiling(mut self, kind: ErrorKind, max_attempts: Option<u32>) -> Self {
        match kind {
            ErrorKind::TransientRateLimited => self.rate_limited = max_attempts,
            ErrorKind::TransientServerUnavailable => self.server_unavailable = max_attempts,
            ErrorKind::TransientNetwork => self.network = max_attempts,
            ErrorKind::TransientWriteFailure => self.write_failure = max_attempts,
            ErrorKind::PermanentClientError => {}
        }
        self
    }

    /// Overrides the warning interval for unlimited kinds (minimum 1).
    #[must_use]
    pub fn with_warn_every(mut self, warn_every: u32) -> Self {
        self.warn_every = warn_every.max(1);
        self
    }

    /// Ceiling for `kind`; permanent failures always have a ceiling of zero.
    #[must_use]
    pub fn ceiling(&self, kind: ErrorKind) -> Option<u32> {
        match kind {
            ErrorKind::TransientRateLimited => self.rate_limited,
            ErrorKind::TransientServerUnavailable => self.server_unavailable,
            ErrorKind::TransientNetwork => self.network,
            ErrorKind::TransientWriteFailure => self.write_failure,
            ErrorKind::PermanentClientError => Some(0),
        }
    }

    fn allows(&self, kind: ErrorKind, attempts: u32) -> bool {
        self.ceiling(kind).is_none_or(|ceiling| attempts <= ceiling)
    }
}

/// Outcome of recording a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    /// The item is queued with this many attempts of its current kind.
    Queued {
        /// Attempts after recording this failure.
        attempts: u32,
    },
    /// The ceiling was exceeded; the item was removed and should be reported
    /// as a permanent failure.
    Dropped(Box<RetryItem>),
    /// Permanent kinds are never queued.
    Rejected,
}

/// FIFO retry queue persisted as a JSON array.
#[derive(Debug)]
pub struct RetryQueue {
    path: PathBuf,
    policy: RetryPolicy,
    items: Vec<RetryItem>,
}

impl RetryQueue {
    /// Creates an empty queue that will be saved to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            items: Vec::new(),
        }
    }

    /// Loads the queue from `path`.
    ///
    /// Never fails: a missing file yields an empty queue, a corrupt one an
    /// empty queue with a warning. Duplicate keys keep their first entry.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, policy: RetryPolicy) -> Self {
        let path = path.as_ref();
        let mut queue = Self::new(path, policy);

        match state::load_json::<Vec<RetryItem>>(path) {
            LoadOutcome::Loaded(items) => {
                for item in items {
                    if queue.position(&item.key).is_some() {
                        warn!(key = %item.key, "duplicate retry queue entry ignored");
                        continue;
                    }
                    queue.items.push(item);
                }
                debug!(items = queue.items.len(), "loaded retry queue");
            }
            LoadOutcome::Missing => info!("no retry queue yet, starting empty"),
            LoadOutcome::Corrupt { reason } => {
                warn!(%reason, "retry queue unreadable, starting empty");
            }
        }
        queue
    }

    fn position(&self, key: &TrackedKey) -> Option<usize> {
        self.items.iter().position(|item| &item.key == key)
    }

    /// Records a failure for `key`.
    ///
    /// Same kind as the stored item increments its attempts; a different kind
    /// switches the kind and restarts attempts at 1; an unknown key is
    /// appended with 1 attempt.
    #[instrument(skip(self, payload, error), fields(key = %key))]
    pub fn enqueue(
        &mut self,
        key: TrackedKey,
        kind: ErrorKind,
        payload: RetryPayload,
        cycle: u64,
        error: &str,
    ) -> QueueOutcome {
        if !kind.is_transient() {
            warn!(%kind, "refusing to queue permanent failure");
            return QueueOutcome::Rejected;
        }

        let index = if let Some(index) = self.position(&key) {
            let item = &mut self.items[index];
            if item.error_kind == kind {
                item.attempts = item.attempts.saturating_add(1);
            } else {
                debug!(from = %item.error_kind, to = %kind, "failure kind changed, restarting attempts");
                item.error_kind = kind;
                item.attempts = 1;
            }
            item.payload = payload;
            item.last_failed_cycle = cycle;
            item.last_error = error.to_string();
            index
        } else {
            self.items.push(RetryItem {
                key,
                error_kind: kind,
                attempts: 1,
                enqueued_cycle: cycle,
                last_failed_cycle: cycle,
                payload,
                last_error: error.to_string(),
            });
            self.items.len() - 1
        };

        self.settle(index)
    }

    /// Records another failure of the same kind for an already queued key.
    ///
    /// Returns `None` if `key` is not queued.
    #[instrument(skip(self, error), fields(key = %key))]
    pub fn requeue(&mut self, key: &TrackedKey, cycle: u64, error: &str) -> Option<QueueOutcome> {
        let index = self.position(key)?;
        let item = &mut self.items[index];
        item.attempts = item.attempts.saturating_add(1);
        item.last_failed_cycle = cycle;
        item.last_error = error.to_string();
        Some(self.settle(index))
    }

    /// Applies the ceiling to the item at `index` after its attempts changed.
    fn settle(&mut self, index: usize) -> QueueOutcome {
        let item = &self.items[index];
        let (kind, attempts) = (item.error_kind, item.attempts);

        if !self.policy.allows(kind, attempts) {
            let dropped = self.items.remove(index);
            warn!(
                key = %dropped.key,
                %kind,
                attempts,
                "retry ceiling exceeded, giving up"
            );
            return QueueOutcome::Dropped(Box::new(dropped));
        }

        if self.policy.ceiling(kind).is_none() && attempts % self.policy.warn_every == 0 {
            warn!(
                key = %item.key,
                %kind,
                attempts,
                last_error = %item.last_error,
                "item keeps failing across cycles"
            );
        }
        QueueOutcome::Queued { attempts }
    }

    /// Returns every item due for retry in `current_cycle`, oldest first.
    ///
    /// Items remain stored; settle each one with `ack`, `requeue` or `enqueue`.
    #[must_use]
    pub fn drain(&self, current_cycle: u64) -> Vec<RetryItem> {
        let due: Vec<RetryItem> = self
            .items
            .iter()
            .filter(|item| self.policy.allows(item.error_kind, item.attempts))
            .filter(|item| item.last_failed_cycle < current_cycle)
            .cloned()
            .collect();
        debug!(current_cycle, due = due.len(), queued = self.items.len(), "drained retry queue");
        due
    }

    /// Removes queued items whose attempts already exceed their ceiling.
    ///
    /// Happens when the configured ceiling was lowered between runs.
    pub fn prune_exhausted(&mut self) -> Vec<RetryItem> {
        let policy = &self.policy;
        let (keep, pruned): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| policy.allows(item.error_kind, item.attempts));
        self.items = keep;
        for item in &pruned {
            warn!(key = %item.key, attempts = item.attempts, "pruned exhausted retry item");
        }
        pruned
    }

    /// Removes `key`. Returns true if it was queued.
    pub fn ack(&mut self, key: &TrackedKey) -> bool {
        match self.position(key) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// True if `key` is queued.
    #[must_use]
    pub fn contains(&self, key: &TrackedKey) -> bool {
        self.position(key).is_some()
    }

    /// Returns the stored item for `key`.
    #[must_use]
    pub fn get(&self, key: &TrackedKey) -> Option<&RetryItem> {
        self.position(key).map(|index| &self.items[index])
    }

    /// Highest cycle number recorded in the queue, or 0 when empty.
    #[must_use]
    pub fn last_cycle(&self) -> u64 {
        self.items
            .iter()
            .map(|item| item.enqueued_cycle.max(item.last_failed_cycle))
            .max()
            .unwrap_or(0)
    }

    /// Iterates over queued keys in FIFO order.
    pub fn keys(&self) -> impl Iterator<Item = &TrackedKey> {
        self.items.iter().map(|item| &item.key)
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the policy in effect.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Writes the queue atomically to its path.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file cannot be written.
    #[instrument(skip(self), fields(path = %self.path.display(), items = self.items.len()))]
    pub fn save(&self) -> Result<(), StateError> {
        state::write_json_atomic(&self.path, &self.items)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn payload(name: &str) -> RetryPayload {
        RetryPayload {
            item_id: "ITEM1".to_string(),
            container: "Show".to_string(),
            entry: FileEntry {
                relative_path: name.to_string(),
                size_bytes: 1,
                link: format!("https://hoster.test/d/{name}"),
            },
            keep_extension: false,
        }
    }

    fn key(name: &str) -> TrackedKey {
        TrackedKey::from_parts("Show", name)
    }

    fn queue(policy: RetryPolicy) -> RetryQueue {
        RetryQueue::new("unused.json", policy)
    }

    const BUSY: ErrorKind = ErrorKind::TransientServerUnavailable;
    const THROTTLED: ErrorKind = ErrorKind::TransientRateLimited;

    // ==================== Enqueue Tests ====================

    #[test]
    fn test_enqueue_new_key_starts_at_one() {
        let mut q = queue(RetryPolicy::default());
        let outcome = q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "503");
        assert_eq!(outcome, QueueOutcome::Queued { attempts: 1 });
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_enqueue_same_kind_increments() {
        let mut q = queue(RetryPolicy::default());
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "503");
        let outcome = q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 2, "503 again");
        assert_eq!(outcome, QueueOutcome::Queued { attempts: 2 });
        assert_eq!(q.len(), 1);
        assert_eq!(q.get(&key("a.mkv")).unwrap().last_error, "503 again");
    }

    #[test]
    fn test_enqueue_kind_switch_restarts_attempts() {
        let mut q = queue(RetryPolicy::default());
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "503");
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 2, "503");
        let outcome = q.enqueue(key("a.mkv"), THROTTLED, payload("a.mkv"), 3, "429");

        assert_eq!(outcome, QueueOutcome::Queued { attempts: 1 });
        let item = q.get(&key("a.mkv")).unwrap();
        assert_eq!(item.error_kind, THROTTLED);
        assert_eq!(item.enqueued_cycle, 1);
    }

    #[test]
    fn test_enqueue_rejects_permanent_kind() {
        let mut q = queue(RetryPolicy::default());
        let outcome = q.enqueue(
            key("a.mkv"),
            ErrorKind::PermanentClientError,
            payload("a.mkv"),
            1,
            "404",
        );
        assert_eq!(outcome, QueueOutcome::Rejected);
        assert!(q.is_empty());
    }

    // ==================== Drain / Ack Tests ====================

    #[test]
    fn test_drain_is_fifo_and_non_destructive() {
        let mut q = queue(RetryPolicy::default());
        q.enqueue(key("b.mkv"), BUSY, payload("b.mkv"), 1, "");
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "");

        let due = q.drain(2);
        let keys: Vec<_> = due.iter().map(|item| item.key.as_str()).collect();
        assert_eq!(keys, vec!["Show/b.mkv", "Show/a.mkv"]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_drain_skips_items_failed_in_current_cycle() {
        let mut q = queue(RetryPolicy::default());
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 3, "");
        assert!(q.drain(3).is_empty());
        assert_eq!(q.drain(4).len(), 1);
    }

    #[test]
    fn test_ack_removes() {
        let mut q = queue(RetryPolicy::default());
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "");
        assert!(q.ack(&key("a.mkv")));
        assert!(!q.ack(&key("a.mkv")));
        assert!(q.is_empty());
    }

    // ==================== Ceiling Tests ====================

    #[test]
    fn test_requeue_drops_past_ceiling() {
        let mut q = queue(RetryPolicy::uniform(Some(2)));
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "");
        assert_eq!(
            q.requeue(&key("a.mkv"), 2, ""),
            Some(QueueOutcome::Queued { attempts: 2 })
        );

        match q.requeue(&key("a.mkv"), 3, "still 503") {
            Some(QueueOutcome::Dropped(item)) => {
                assert_eq!(item.attempts, 3);
                assert_eq!(item.last_error, "still 503");
            }
            other => panic!("expected drop, got {other:?}"),
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_requeue_unknown_key_is_none() {
        let mut q = queue(RetryPolicy::default());
        assert_eq!(q.requeue(&key("nope.mkv"), 1, ""), None);
    }

    #[test]
    fn test_unlimited_ceiling_keeps_item_across_ten_cycles() {
        let mut q = queue(RetryPolicy::default());
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "503");
        for cycle in 2..=10 {
            let outcome = q.requeue(&key("a.mkv"), cycle, "503").unwrap();
            assert!(matches!(outcome, QueueOutcome::Queued { .. }));
        }

        assert_eq!(q.get(&key("a.mkv")).unwrap().attempts, 10);
        let due = q.drain(11);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, key("a.mkv"));
    }

    #[test]
    fn test_per_kind_ceiling_override() {
        let policy = RetryPolicy::default().with_ceiling(THROTTLED, Some(1));
        assert_eq!(policy.ceiling(THROTTLED), Some(1));
        assert_eq!(policy.ceiling(BUSY), None);
        assert_eq!(policy.ceiling(ErrorKind::PermanentClientError), Some(0));

        let mut q = queue(policy);
        q.enqueue(key("a.mkv"), THROTTLED, payload("a.mkv"), 1, "");
        assert!(matches!(
            q.enqueue(key("a.mkv"), THROTTLED, payload("a.mkv"), 2, ""),
            QueueOutcome::Dropped(_)
        ));
    }

    #[test]
    fn test_prune_exhausted_after_ceiling_lowered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry_queue.json");
        let mut q = RetryQueue::new(&path, RetryPolicy::default());
        q.enqueue(key("a.mkv"), BUSY, payload("a.mkv"), 1, "");
        q.requeue(&key("a.mkv"), 2, "");
        q.requeue(&key("a.mkv"), 3, "");
        q.enqueue(key("b.mkv"), BUSY, payload("b.mkv"), 3, "");
        q.save().unwrap();

        let mut reloaded = RetryQueue::load(&path, RetryPolicy::uniform(Some(2)));
        let pruned = reloaded.prune_exhausted();
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].key, key("a.mkv"));
        assert_eq!(reloaded.keys().collect::<Vec<_>>(), vec![&key("b.mkv")]);
    }

    // ==================== Persistence Tests ====================

    #[test]
    fn test_save_load_preserves_order_and_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry_queue.json");
        let mut q = RetryQueue::new(&path, RetryPolicy::default());
        q.enqueue(key("z.mkv"), BUSY, payload("z.mkv"), 4, "HTTP 503");
        q.enqueue(key("a.mkv"), THROTTLED, payload("a.mkv"), 5, "HTTP 429");
        q.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"transient_server_unavailable\""));

        let loaded = RetryQueue::load(&path, RetryPolicy::default());
        let expected: Vec<_> = q.drain(6);
        assert_eq!(loaded.drain(6), expected);
        assert_eq!(loaded.last_cycle(), 5);
    }

    #[test]
    fn test_load_corrupt_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry_queue.json");
        std::fs::write(&path, "[{\"key\": ").unwrap();
        let loaded = RetryQueue::load(&path, RetryPolicy::default());
        assert!(loaded.is_empty());
        assert_eq!(loaded.last_cycle(), 0);
    }
}
