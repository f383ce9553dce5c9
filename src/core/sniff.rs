//! Content type detection from leading bytes
//!
//! The file extension is never consulted.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const SNIFF_LEN: usize = 8192;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
];

/// Detect the MIME type of the file at `path`
///
/// Returns `Ok(None)` for an empty file; such a file is still being written
/// or carries nothing to send.
pub fn sniff_content_type(path: &Path) -> io::Result<Option<&'static str>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut buf)?;
    Ok(sniff_bytes(&buf))
}

/// Detect the MIME type of a buffer holding the start of a file
pub fn sniff_bytes(head: &[u8]) -> Option<&'static str> {
    if head.is_empty() {
        return None;
    }
    for &(magic, mime) in SIGNATURES {
        if head.starts_with(magic) {
            return Some(mime);
        }
    }
    if looks_like_text(head) {
        Some("text/plain")
    } else {
        Some("application/octet-stream")
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte character cut off by the sniff window
        Err(e) => e.error_len().is_none() && head.len() == SNIFF_LEN,
    }
}
