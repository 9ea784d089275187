//! Persistent registry of files already handed to the output writer.
//!
//! The registry maps each [`TrackedKey`] to the time its output was last
//! written. A key is "fresh" while that timestamp is younger than the
//! configured expiry; once it ages out, the next cycle resolves the file
//! again and rewrites it, picking up a new direct URL.
//!
//! On disk the registry is a JSON object `{ "<key>": "<RFC 3339 timestamp>" }`
//! with keys in sorted order.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::state::{self, LoadOutcome, StateError};

/// Stable identity of one output file: `"<container>/<relative_path>"`.
///
/// Normalized on construction: backslashes become `/`, empty segments are
/// dropped, and there is never a leading or trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedKey(String);

impl TrackedKey {
    /// Normalizes `raw` into a key.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let normalized = raw
            .replace('\\', "/")
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    /// Builds a key from a container name and a path inside it.
    #[must_use]
    pub fn from_parts(container: &str, relative_path: &str) -> Self {
        Self::new(&format!("{container}/{relative_path}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key → last-written timestamp store with atomic persistence.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    entries: BTreeMap<TrackedKey, DateTime<Utc>>,
}

impl FileRegistry {
    /// Creates an empty registry that will be saved to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the registry from `path`.
    ///
    /// Never fails: a missing file yields an empty registry, and a corrupt or
    /// unreadable file yields an empty registry with a warning (every file is
    /// then treated as new for one cycle).
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let entries = match state::load_json::<BTreeMap<String, DateTime<Utc>>>(path) {
            LoadOutcome::Loaded(raw) => {
                let entries: BTreeMap<_, _> = raw
                    .into_iter()
                    .map(|(key, written_at)| (TrackedKey::new(&key), written_at))
                    .collect();
                debug!(entries = entries.len(), "loaded file registry");
                entries
            }
            LoadOutcome::Missing => {
                info!("no file registry yet, starting empty");
                BTreeMap::new()
            }
            LoadOutcome::Corrupt { reason } => {
                warn!(%reason, "file registry unreadable, starting empty");
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Returns the file this registry is persisted to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff `key` has an entry younger than `expiry` at `now`.
    #[must_use]
    pub fn is_fresh(&self, key: &TrackedKey, now: DateTime<Utc>, expiry: TimeDelta) -> bool {
        self.entries
            .get(key)
            .is_some_and(|written_at| now.signed_duration_since(*written_at) < expiry)
    }

    /// Records a successful write at `now`, replacing any previous entry.
    pub fn record(&mut self, key: TrackedKey, now: DateTime<Utc>) {
        self.entries.insert(key, now);
    }

    /// Returns when `key` was last written, if ever.
    #[must_use]
    pub fn written_at(&self, key: &TrackedKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).copied()
    }

    /// Removes every entry whose key is not in `live_keys`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_orphans(&mut self, live_keys: &HashSet<TrackedKey>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| live_keys.contains(key));
        before - self.entries.len()
    }

    /// Number of entries old enough to be refreshed at `now`.
    #[must_use]
    pub fn stale_count(&self, now: DateTime<Utc>, expiry: TimeDelta) -> usize {
        self.entries
            .values()
            .filter(|written_at| now.signed_duration_since(**written_at) >= expiry)
            .count()
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over tracked keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &TrackedKey> {
        self.entries.keys()
    }

    /// Writes the registry atomically to its path.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file cannot be written.
    #[instrument(skip(self), fields(path = %self.path.display(), entries = self.entries.len()))]
    pub fn save(&self) -> Result<(), StateError> {
        state::write_json_atomic(&self.path, &self.entries)
    }
}
