//! File-type filter applied before any resolution request is spent.
//!
//! Subtitles always pass. Videos pass when they reach a size floor, which
//! keeps samples and trailers out of the library. Everything else (archives,
//! artwork, text files) is rejected. A listed file without an extension is
//! decided after resolution, from the reported filename or MIME type.

use std::collections::BTreeSet;
use std::fmt;

use crate::api::{FileEntry, ResolvedFile, file_extension};

/// Extensions treated as video, lowercase without the dot.
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "wmv", "m4v", "webm", "flv"];

/// Extensions treated as subtitles, lowercase without the dot.
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "vtt", "sub", "idx", "ssa", "smi"];

/// Default minimum video size in MiB.
pub const DEFAULT_MIN_VIDEO_SIZE_MB: u64 = 300;

const MIB: u64 = 1024 * 1024;

/// Broad category of an accepted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    /// A playable video.
    Video,
    /// A subtitle track.
    Subtitle,
}

/// Why a file was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Video below the configured size floor.
    TooSmall {
        /// Actual size in bytes.
        size_bytes: u64,
        /// Floor in bytes.
        min_bytes: u64,
    },
    /// Extension is neither video nor subtitle.
    UnsupportedExtension(Option<String>),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall {
                size_bytes,
                min_bytes,
            } => write!(f, "video too small ({size_bytes} < {min_bytes} bytes)"),
            Self::UnsupportedExtension(Some(ext)) => write!(f, "unsupported extension '{ext}'"),
            Self::UnsupportedExtension(None) => write!(f, "no file extension"),
        }
    }
}

/// Accept/reject decision for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Resolve and write this file.
    Accept(MediaCategory),
    /// Skip this file for this cycle.
    Reject(RejectReason),
    /// The listing carries no extension; resolve, then decide with
    /// [`MediaFilter::evaluate_resolved`].
    Undetermined,
}

impl FilterDecision {
    /// True for [`FilterDecision::Accept`].
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// Returns true if `ext` (any case, no dot) is a known video extension.
#[must_use]
pub fn is_video_extension(ext: &str) -> bool {
    VIDEO_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// Returns true if `ext` (any case, no dot) is a known subtitle extension.
#[must_use]
pub fn is_subtitle_extension(ext: &str) -> bool {
    SUBTITLE_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// Returns true for MIME types that describe a video stream.
#[must_use]
pub fn is_video_mime(mime_type: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    mime.starts_with("video/") || mime.contains("matroska")
}

/// Size- and extension-based media filter.
#[derive(Debug, Clone)]
pub struct MediaFilter {
    min_video_bytes: u64,
    extra_video_extensions: BTreeSet<String>,
}

impl Default for MediaFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VIDEO_SIZE_MB)
    }
}

impl MediaFilter {
    /// Creates a filter with a video size floor in MiB. Zero accepts every video.
    #[must_use]
    pub fn new(min_video_size_mb: u64) -> Self {
        Self {
            min_video_bytes: min_video_size_mb.saturating_mul(MIB),
            extra_video_extensions: BTreeSet::new(),
        }
    }

    /// Treats additional extensions as video.
    #[must_use]
    pub fn with_extra_video_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extra_video_extensions.extend(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty()),
        );
        self
    }

    /// Returns the video size floor in bytes.
    #[must_use]
    pub fn min_video_bytes(&self) -> u64 {
        self.min_video_bytes
    }

    /// Decides whether `entry` should be resolved.
    #[must_use]
    pub fn evaluate(&self, entry: &FileEntry) -> FilterDecision {
        match entry.extension() {
            Some(ext) => self.by_extension(&ext, entry.size_bytes, None),
            None => FilterDecision::Undetermined,
        }
    }

    /// Decides a file the listing left [`FilterDecision::Undetermined`],
    /// using what the resolution endpoint reported.
    #[must_use]
    pub fn evaluate_resolved(&self, resolved: &ResolvedFile) -> FilterDecision {
        let size_bytes = resolved.size_bytes.unwrap_or(resolved.entry.size_bytes);
        let mime = resolved.mime_type.as_deref();
        match file_extension(&resolved.filename) {
            Some(ext) => self.by_extension(&ext, size_bytes, mime),
            None if mime.is_some_and(is_video_mime) => self.by_size(size_bytes),
            None => FilterDecision::Reject(RejectReason::UnsupportedExtension(None)),
        }
    }

    fn by_extension(&self, ext: &str, size_bytes: u64, mime: Option<&str>) -> FilterDecision {
        if is_subtitle_extension(ext) {
            return FilterDecision::Accept(MediaCategory::Subtitle);
        }
        if is_video_extension(ext)
            || self.extra_video_extensions.contains(ext)
            || mime.is_some_and(is_video_mime)
        {
            return self.by_size(size_bytes);
        }
        FilterDecision::Reject(RejectReason::UnsupportedExtension(Some(ext.to_string())))
    }

    fn by_size(&self, size_bytes: u64) -> FilterDecision {
        if size_bytes >= self.min_video_bytes {
            FilterDecision::Accept(MediaCategory::Video)
        } else {
            FilterDecision::Reject(RejectReason::TooSmall {
                size_bytes,
                min_bytes: self.min_video_bytes,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size_bytes: u64) -> FileEntry {
        FileEntry {
            relative_path: path.to_string(),
            size_bytes,
            link: "https://hoster.test/d/x".to_string(),
        }
    }

    #[test]
    fn test_large_video_accepted() {
        let filter = MediaFilter::default();
        assert_eq!(
            filter.evaluate(&entry("Movie.mkv", 300 * MIB)),
            FilterDecision::Accept(MediaCategory::Video)
        );
    }

    #[test]
    fn test_small_video_rejected() {
        let filter = MediaFilter::default();
        let decision = filter.evaluate(&entry("Sample/sample.MP4", 299 * MIB));
        assert!(matches!(
            decision,
            FilterDecision::Reject(RejectReason::TooSmall { .. })
        ));
    }

    #[test]
    fn test_subtitles_always_accepted() {
        let filter = MediaFilter::default();
        assert_eq!(
            filter.evaluate(&entry("Subs/English.srt", 12)),
            FilterDecision::Accept(MediaCategory::Subtitle)
        );
        assert!(filter.evaluate(&entry("x.VTT", 0)).is_accept());
    }

    #[test]
    fn test_other_types_rejected() {
        let filter = MediaFilter::default();
        assert_eq!(
            filter.evaluate(&entry("info.nfo", 10 * 1024 * MIB)),
            FilterDecision::Reject(RejectReason::UnsupportedExtension(Some("nfo".into())))
        );
    }

    #[test]
    fn test_missing_extension_is_undetermined() {
        let filter = MediaFilter::default();
        assert_eq!(filter.evaluate(&entry("README", 1)), FilterDecision::Undetermined);
        assert!(!FilterDecision::Undetermined.is_accept());
    }

    fn resolved(filename: &str, size_bytes: Option<u64>, mime: Option<&str>) -> ResolvedFile {
        ResolvedFile {
            entry: entry("unnamed", 0),
            url: "https://cdn.test/x".to_string(),
            filename: filename.to_string(),
            size_bytes,
            mime_type: mime.map(str::to_string),
        }
    }

    #[test]
    fn test_resolved_filename_extension_decides() {
        let filter = MediaFilter::default();
        assert_eq!(
            filter.evaluate_resolved(&resolved("Movie.mkv", Some(400 * MIB), None)),
            FilterDecision::Accept(MediaCategory::Video)
        );
        assert_eq!(
            filter.evaluate_resolved(&resolved("Movie.en.srt", Some(1), None)),
            FilterDecision::Accept(MediaCategory::Subtitle)
        );
    }

    #[test]
    fn test_video_mime_accepts_unknown_extension() {
        let filter = MediaFilter::default();
        assert_eq!(
            filter.evaluate_resolved(&resolved("stream", Some(400 * MIB), Some("video/mp4"))),
            FilterDecision::Accept(MediaCategory::Video)
        );
        assert_eq!(
            filter.evaluate_resolved(&resolved(
                "clip.bin",
                Some(400 * MIB),
                Some("application/x-matroska")
            )),
            FilterDecision::Accept(MediaCategory::Video)
        );
        assert!(matches!(
            filter.evaluate_resolved(&resolved("stream", Some(MIB), Some("video/mp4"))),
            FilterDecision::Reject(RejectReason::TooSmall { .. })
        ));
    }

    #[test]
    fn test_resolved_without_extension_or_video_mime_is_rejected() {
        let filter = MediaFilter::default();
        assert_eq!(
            filter.evaluate_resolved(&resolved("notes", Some(1), Some("text/plain"))),
            FilterDecision::Reject(RejectReason::UnsupportedExtension(None))
        );
    }

    #[test]
    fn test_resolved_size_falls_back_to_listing() {
        let filter = MediaFilter::new(1);
        let mut file = resolved("a.mkv", None, None);
        file.entry.size_bytes = 2 * MIB;
        assert!(filter.evaluate_resolved(&file).is_accept());
    }

    #[test]
    fn test_zero_floor_accepts_every_video() {
        let filter = MediaFilter::new(0);
        assert!(filter.evaluate(&entry("tiny.avi", 1)).is_accept());
    }

    #[test]
    fn test_extra_video_extensions() {
        let filter = MediaFilter::new(0).with_extra_video_extensions([".TS", "m2ts"]);
        assert!(filter.evaluate(&entry("broadcast.ts", 1)).is_accept());
        assert!(filter.evaluate(&entry("disc.m2ts", 1)).is_accept());
    }

    #[test]
    fn test_reject_reason_display() {
        let reason = RejectReason::TooSmall {
            size_bytes: 1,
            min_bytes: 2,
        };
        assert!(reason.to_string().contains("too small"));
    }
}
