#![allow(dead_code)]

pub mod socket_guard;

use serde_json::{Value, json};

/// A listing item whose files are all ready.
pub fn ready_item(id: &str, container: &str, files: &[(&str, u64)]) -> Value {
    json!({
        "id": id,
        "filename": container,
        "status": "downloaded",
        "files": files
            .iter()
            .map(|(path, bytes)| json!({
                "path": path,
                "bytes": bytes,
                "link": format!("https://hoster.test/d/{path}"),
            }))
            .collect::<Vec<_>>(),
    })
}

/// A listing item in the bare `links` layout, with no `files`.
pub fn linked_item(id: &str, filename: &str, bytes: u64, links: &[&str]) -> Value {
    json!({
        "id": id,
        "filename": filename,
        "status": "downloaded",
        "bytes": bytes,
        "links": links,
    })
}

/// A detail response: `(path, bytes, selected)` per file, plus the links of
/// the selected files in order.
pub fn item_details(id: &str, files: &[(&str, u64, bool)], links: &[&str]) -> Value {
    json!({
        "id": id,
        "files": files
            .iter()
            .enumerate()
            .map(|(n, (path, bytes, selected))| json!({
                "id": n + 1,
                "path": path,
                "bytes": bytes,
                "selected": u8::from(*selected),
            }))
            .collect::<Vec<_>>(),
        "links": links,
    })
}

/// A resolution response for `download`.
pub fn unrestricted(filename: &str, download: &str) -> Value {
    json!({
        "filename": filename,
        "filesize": 1_073_741_824_u64,
        "download": download,
        "mimeType": "video/x-matroska",
    })
}
