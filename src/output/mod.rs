//! Output layer: where resolved URLs end up.
//!
//! The orchestrator only knows the [`OutputWriter`] trait. [`StrmWriter`] is
//! the production implementation, producing `.strm` files a media server can
//! index.

mod sanitize;
mod strm;

pub use sanitize::clashing_outputs;
pub use strm::StrmWriter;

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::TrackedKey;
use crate::state::StateError;

/// Descriptive data about the file being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMetadata {
    /// Container (upstream item) name.
    pub container: String,
    /// Path of the file inside the container.
    pub relative_path: String,
    /// Filename reported by the resolution endpoint.
    pub filename: String,
    /// Keep the video extension in the output name, for a file whose plain
    /// name is taken by a sibling (see [`clashing_outputs`]).
    pub keep_extension: bool,
}

/// Errors raised by an [`OutputWriter`].
#[derive(Debug, Error)]
pub enum OutputError {
    /// The destination could not be written.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Destination file.
        path: PathBuf,
        /// The underlying persistence error.
        #[source]
        source: StateError,
    },

    /// Resolution produced no URL to write.
    #[error("refusing to write empty URL for {key}")]
    EmptyUrl {
        /// The file concerned.
        key: TrackedKey,
    },
}

/// Synchronous, fallible sink for resolved URLs.
///
/// Implementations must be idempotent: writing the same URL for the same
/// key twice leaves the output unchanged.
pub trait OutputWriter: Send + Sync {
    /// Writes `url` for `key` and returns the path written.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] if the output cannot be produced; the
    /// orchestrator queues the file for retry in the next cycle.
    fn write(
        &self,
        key: &TrackedKey,
        url: &str,
        metadata: &OutputMetadata,
    ) -> Result<PathBuf, OutputError>;
}
