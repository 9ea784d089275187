use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::sanitize::{container_folder_name, output_relative_path};
use super::{OutputError, OutputMetadata, OutputWriter};
use crate::registry::TrackedKey;
use crate::state;

/// Writes one `.strm` file per resolved file, in a folder per container.
///
/// Layout: `<media_dir>/<container>/<subdirs...>/<name>.strm`, every
/// component sanitized. The file holds the URL with no trailing newline.
#[derive(Debug, Clone)]
pub struct StrmWriter {
    media_dir: PathBuf,
}

impl StrmWriter {
    /// Creates a writer rooted at `media_dir`.
    #[must_use]
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
        }
    }

    /// Returns the output root.
    #[must_use]
    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Computes where the `.strm` file for `metadata` lives.
    #[must_use]
    pub fn target_path(&self, metadata: &OutputMetadata) -> PathBuf {
        self.media_dir
            .join(container_folder_name(&metadata.container))
            .join(output_relative_path(
                &metadata.relative_path,
                &metadata.filename,
                metadata.keep_extension,
            ))
    }
}

impl OutputWriter for StrmWriter {
    #[instrument(skip(self, url, metadata), fields(key = %key))]
    fn write(
        &self,
        key: &TrackedKey,
        url: &str,
        metadata: &OutputMetadata,
    ) -> Result<PathBuf, OutputError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(OutputError::EmptyUrl { key: key.clone() });
        }

        let path = self.target_path(metadata);
        if fs::read_to_string(&path).is_ok_and(|existing| existing.trim() == url) {
            debug!(path = %path.display(), "same URL already written");
            return Ok(path);
        }

        state::write_bytes_atomic(&path, url.as_bytes()).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "wrote strm file");
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn metadata(container: &str, relative_path: &str) -> OutputMetadata {
        OutputMetadata {
            container: container.to_string(),
            relative_path: relative_path.to_string(),
            filename: relative_path
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            keep_extension: false,
        }
    }

    #[test]
    fn test_target_path_layout() {
        let writer = StrmWriter::new("/media");
        let path = writer.target_path(&metadata("Show: S01", "Season 1/e01.mkv"));
        assert_eq!(path, PathBuf::from("/media/Show S01/Season 1/e01.strm"));
    }

    #[test]
    fn test_target_path_single_file_container() {
        let writer = StrmWriter::new("/media");
        let path = writer.target_path(&metadata("Movie.2020.mkv", "Movie.2020.mkv"));
        assert_eq!(path, PathBuf::from("/media/Movie.2020/Movie.2020.strm"));
    }

    #[test]
    fn test_target_path_cannot_escape_media_dir() {
        let writer = StrmWriter::new("/media");
        let path = writer.target_path(&metadata("..", "../../x/../e01.mkv"));
        assert!(path.starts_with("/media"));
        assert!(
            !path.components().any(|c| c == std::path::Component::ParentDir),
            "parent component survived: {}",
            path.display()
        );
    }

    #[test]
    fn test_target_path_keeps_extension_for_clashing_file() {
        let writer = StrmWriter::new("/media");
        let mut meta = metadata("Show", "e01.mp4");
        meta.keep_extension = true;
        assert_eq!(writer.target_path(&meta), PathBuf::from("/media/Show/e01.mp4.strm"));
    }

    #[test]
    fn test_write_succeeds_for_very_long_names() {
        let dir = TempDir::new().unwrap();
        let writer = StrmWriter::new(dir.path());
        let long = format!("{}.mkv", "A".repeat(300));
        let meta = metadata(&"C".repeat(300), &long);

        let path = writer
            .write(&TrackedKey::new("c/a.mkv"), "https://cdn.test/a", &meta)
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "https://cdn.test/a");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= 255, "{} bytes", name.len());
    }

    #[test]
    fn test_write_creates_file_with_url_only() {
        let dir = TempDir::new().unwrap();
        let writer = StrmWriter::new(dir.path());
        let key = TrackedKey::new("Show/e01.mkv");

        let path = writer
            .write(&key, "https://cdn.test/e01.mkv\n", &metadata("Show", "e01.mkv"))
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "https://cdn.test/e01.mkv");
        assert_eq!(path, dir.path().join("Show").join("e01.strm"));
    }

    #[test]
    fn test_write_replaces_changed_url() {
        let dir = TempDir::new().unwrap();
        let writer = StrmWriter::new(dir.path());
        let key = TrackedKey::new("Show/e01.mkv");
        let meta = metadata("Show", "e01.mkv");

        writer.write(&key, "https://cdn.test/old", &meta).unwrap();
        let path = writer.write(&key, "https://cdn.test/new", &meta).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "https://cdn.test/new");
    }

    #[test]
    fn test_write_rejects_empty_url() {
        let dir = TempDir::new().unwrap();
        let writer = StrmWriter::new(dir.path());
        let error = writer
            .write(&TrackedKey::new("a/b.mkv"), "  ", &metadata("a", "b.mkv"))
            .unwrap_err();
        assert!(matches!(error, OutputError::EmptyUrl { .. }));
    }

    #[test]
    fn test_write_fails_when_media_dir_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("media");
        fs::write(&blocker, "not a dir").unwrap();
        let writer = StrmWriter::new(&blocker);

        let error = writer
            .write(&TrackedKey::new("a/b.mkv"), "https://cdn.test/b", &metadata("a", "b.mkv"))
            .unwrap_err();
        assert!(matches!(error, OutputError::Io { .. }));
    }
}
