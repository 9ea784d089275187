//! Data types exchanged with the content API.

use serde::{Deserialize, Serialize};

/// Upstream status marking an item whose files are ready to resolve.
pub const STATUS_DOWNLOADED: &str = "downloaded";

/// A hosted container (one upstream download) as listed by a page request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteItem {
    /// Upstream identifier. Unique across pages.
    pub id: String,
    /// Container name, used as the top-level output folder.
    pub filename: String,
    /// Upstream processing status (`downloaded`, `queued`, `error`, ...).
    #[serde(default)]
    pub status: String,
    /// Total size of the selected files.
    #[serde(default)]
    pub bytes: u64,
    /// Files inside the container.
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Hoster links, one per selected file, when the listing does not carry
    /// `files`. The client turns these into [`FileEntry`] values before the
    /// item leaves the listing stream.
    #[serde(default)]
    pub links: Vec<String>,
}

impl RemoteItem {
    /// Returns true once upstream has finished downloading the item.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        self.status == STATUS_DOWNLOADED
    }

    /// True when the item only carries bare `links` and its files still
    /// have to be paired with them.
    #[must_use]
    pub fn needs_file_details(&self) -> bool {
        self.files.is_empty() && !self.links.is_empty()
    }
}

/// Body of the per-item detail endpoint.
///
/// `links` pairs positionally with the files whose `selected` flag is set.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemDetails {
    #[serde(default)]
    pub files: Vec<DetailFile>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DetailFile {
    pub path: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub selected: u8,
}

impl ItemDetails {
    /// Pairs selected files with their links, in order.
    ///
    /// Returns the entries and whether the two lists had different lengths;
    /// surplus files or links are dropped.
    pub(crate) fn into_entries(self) -> (Vec<FileEntry>, bool) {
        let selected: Vec<DetailFile> = self
            .files
            .into_iter()
            .filter(|file| file.selected != 0)
            .collect();
        let mismatch = selected.len() != self.links.len();
        let entries = selected
            .into_iter()
            .zip(self.links)
            .map(|(file, link)| FileEntry {
                relative_path: file.path.trim_start_matches('/').to_string(),
                size_bytes: file.bytes,
                link,
            })
            .collect();
        (entries, mismatch)
    }
}

/// One file inside a [`RemoteItem`].
///
/// Persisted inside retry payloads, so it round-trips through serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the container, `/`-separated.
    #[serde(alias = "path")]
    pub relative_path: String,
    /// File size in bytes.
    #[serde(alias = "bytes", default)]
    pub size_bytes: u64,
    /// Hoster link passed to the resolution endpoint.
    pub link: String,
}

impl FileEntry {
    /// Lowercased extension of the last path component, without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.relative_path)
    }
}

/// Lowercased extension of the last component of `path`, without the dot.
pub(crate) fn file_extension(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A file whose hoster link has been resolved into a direct URL.
///
/// Ephemeral: lives for one cycle and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// The entry that was resolved.
    pub entry: FileEntry,
    /// Direct-access URL written into the output file.
    pub url: String,
    /// Filename reported by the resolution endpoint.
    pub filename: String,
    /// Size reported by the resolution endpoint, if any.
    pub size_bytes: Option<u64>,
    /// MIME type reported by the resolution endpoint, if any.
    pub mime_type: Option<String>,
}

/// Body of a successful resolution response.
#[derive(Debug, Deserialize)]
pub(crate) struct UnrestrictResponse {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub filesize: Option<u64>,
    pub download: String,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

impl UnrestrictResponse {
    pub(crate) fn into_resolved(self, entry: &FileEntry) -> ResolvedFile {
        ResolvedFile {
            entry: entry.clone(),
            url: self.download,
            filename: self.filename,
            size_bytes: self.filesize,
            mime_type: self.mime_type,
        }
    }
}
