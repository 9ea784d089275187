//! Persistence helpers shared by the file registry and the retry queue.
//!
//! Writes go to a temporary file in the destination directory, are synced,
//! then renamed over the target, so readers only ever see a complete file.
//! Loads never fail: a missing file and a corrupt file are both reported as
//! outcomes the caller turns into an empty state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors raised while persisting state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Filesystem failure while writing or renaming.
    #[error("failed to persist {path}: {source}")]
    Io {
        /// Destination file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// State could not be serialized.
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        /// Destination file.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns the file the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Serialize { path, .. } => path,
        }
    }
}

/// Result of reading a state file.
#[derive(Debug)]
pub enum LoadOutcome<T> {
    /// File parsed successfully.
    Loaded(T),
    /// File does not exist yet.
    Missing,
    /// File exists but could not be read or parsed.
    Corrupt {
        /// Human-readable description of the problem.
        reason: String,
    },
}

/// Reads and deserializes a JSON state file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> LoadOutcome<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(e) => {
            return LoadOutcome::Corrupt {
                reason: format!("unreadable: {e}"),
            };
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => LoadOutcome::Loaded(value),
        Err(e) => LoadOutcome::Corrupt {
            reason: format!("invalid JSON: {e}"),
        },
    }
}

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
///
/// # Errors
///
/// Returns [`StateError`] if serialization or any filesystem step fails.
/// The previous file, if any, is left untouched on failure.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StateError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes_atomic(path, &bytes)
}

/// Writes `bytes` atomically to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`StateError::Io`] if any filesystem step fails.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| StateError::io(path, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StateError::io(path, e))?;
    tmp.write_all(bytes).map_err(|e| StateError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| StateError::io(path, e))?;
    tmp.persist(path).map_err(|e| StateError::io(path, e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "state written");
    Ok(())
}
