//! Filesystem-safe naming for output folders and files.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::filter::{is_subtitle_extension, is_video_extension};

/// Upstream names are sometimes percent-encoded more than once.
const MAX_DECODE_PASSES: usize = 3;

/// Replacement for a name that sanitizes to nothing.
const EMPTY_NAME: &str = "_";

/// Byte budget for one sanitized component, leaving room for an extension
/// and the `.strm` suffix under the usual 255-byte filesystem limit.
pub(crate) const MAX_COMPONENT_BYTES: usize = 200;

/// Longer suffixes are not treated as an extension.
const MAX_EXTENSION_BYTES: usize = 16;

/// Percent-decodes `value` repeatedly until it stops changing.
///
/// Stops early (keeping the last valid result) if a pass would produce
/// invalid UTF-8.
pub(crate) fn decode_percent(value: &str) -> String {
    let mut current = value.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        match urlencoding::decode(&current) {
            Ok(Cow::Owned(decoded)) if decoded != current => current = decoded,
            _ => break,
        }
    }
    current
}

/// Sanitizes one path component.
///
/// Removes characters invalid on common filesystems, collapses whitespace,
/// and trims leading/trailing dots and spaces so `.` and `..` cannot survive.
pub(crate) fn sanitize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_space = false;
    for ch in value.chars() {
        match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => {}
            c if c.is_control() => {}
            c if c.is_whitespace() => {
                if !prev_space {
                    out.push(' ');
                    prev_space = true;
                }
            }
            c => {
                out.push(c);
                prev_space = false;
            }
        }
    }

    let trimmed = truncate_to_bytes(trim_edges(&out), MAX_COMPONENT_BYTES);
    let trimmed = trim_edges(trimmed);
    if trimmed.is_empty() {
        EMPTY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

fn trim_edges(value: &str) -> &str {
    value.trim_matches(|c| c == '.' || c == ' ')
}

/// Cuts `value` to at most `max_bytes` on a char boundary, preferring the
/// last space in the second half of the budget.
fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let cut = &value[..end];
    match cut.rfind(' ') {
        Some(space) if space >= max_bytes / 2 => &cut[..space],
        _ => cut,
    }
}

/// Folder name for a container.
///
/// Single-file containers are named after their file, so a trailing video or
/// subtitle extension is dropped.
pub(crate) fn container_folder_name(container: &str) -> String {
    let decoded = decode_percent(container);
    let without_ext = match decoded.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && (is_video_extension(ext) || is_subtitle_extension(ext)) =>
        {
            stem
        }
        _ => decoded.as_str(),
    };
    sanitize_component(without_ext)
}

/// Output filename (with `.strm`) for the last component of a relative path.
///
/// Video extensions are replaced by `.strm` unless `keep_extension` is set;
/// any other name keeps its extension so a subtitle never collides with the
/// video it belongs to.
pub(crate) fn strm_file_name(file_name: &str, keep_extension: bool) -> String {
    let decoded = decode_percent(file_name);
    match decoded.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.len() <= MAX_EXTENSION_BYTES =>
        {
            let stem = sanitize_component(stem);
            if is_video_extension(ext) && !keep_extension {
                format!("{stem}.strm")
            } else {
                format!("{stem}.{}.strm", sanitize_component(ext))
            }
        }
        _ => format!("{}.strm", sanitize_component(&decoded)),
    }
}

/// Output path, relative to the container folder, for a file inside it.
///
/// `fallback_name` is used when `relative_path` has no usable component.
pub(crate) fn output_relative_path(
    relative_path: &str,
    fallback_name: &str,
    keep_extension: bool,
) -> PathBuf {
    let normalized = relative_path.replace('\\', "/");
    let mut components: Vec<&str> = normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    let file_name = components.pop().unwrap_or(fallback_name);

    let mut path = PathBuf::new();
    for dir in components {
        path.push(sanitize_component(&decode_percent(dir)));
    }
    path.push(strm_file_name(file_name, keep_extension));
    path
}

/// Indices of the files in one container whose output path clashes with a
/// file sorting before them, such as `e01.mkv` and `e01.mp4`.
///
/// The first path in sort order keeps the plain name, so the choice does not
/// depend on listing order.
#[must_use]
pub fn clashing_outputs(relative_paths: &[&str]) -> HashSet<usize> {
    let mut by_target: HashMap<PathBuf, Vec<usize>> = HashMap::new();
    for (index, path) in relative_paths.iter().enumerate() {
        by_target
            .entry(output_relative_path(path, path, false))
            .or_default()
            .push(index);
    }

    let mut clashing = HashSet::new();
    for mut group in by_target.into_values().filter(|group| group.len() > 1) {
        group.sort_by_key(|&index| relative_paths[index]);
        clashing.extend(group.into_iter().skip(1));
    }
    clashing
}
