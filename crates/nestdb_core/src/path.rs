//! Request path resolution.
//!
//! A raw URL path is split on `/`, each segment percent-decoded, and the
//! fixed API-version prefix stripped. The resolved segment sequence drives
//! the tree walk: segment 0 names a database root, odd indexes name
//! documents, and even indexes name nested collections.

use crate::error::{EngineError, EngineResult, EntityKind};

/// The API-version token stripped from the front of every path.
pub const API_VERSION: &str = "v1";

/// Splits `raw` into decoded segment names.
///
/// Leading and trailing slashes are dropped, every segment is
/// percent-decoded (a malformed escape is a decode error), a leading
/// [`API_VERSION`] segment is removed, and an empty remainder is rejected.
pub fn resolve(raw: &str) -> EngineResult<Vec<String>> {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return Err(EngineError::invalid_path("empty path"));
    }

    let mut segments = Vec::new();
    for part in trimmed.split('/') {
        if part.is_empty() {
            return Err(EngineError::invalid_path("empty path segment"));
        }
        segments.push(decode_segment(part)?);
    }

    if segments.first().map(String::as_str) == Some(API_VERSION) {
        segments.remove(0);
    }
    if segments.is_empty() {
        return Err(EngineError::invalid_path("empty path"));
    }
    Ok(segments)
}

/// The entity kind addressed by segment `index` of a resolved path.
///
/// Index 0 is the database root; from there the tree alternates
/// document/collection, so odd indexes are documents and even indexes are
/// collections.
pub fn kind_at(index: usize) -> EntityKind {
    if index == 0 {
        EntityKind::Database
    } else if index % 2 == 1 {
        EntityKind::Document
    } else {
        EntityKind::Collection
    }
}

/// The canonical URI for a resolved path: the decoded segments re-joined
/// under the API-version prefix.
pub fn canonical_uri(segments: &[String]) -> String {
    format!("/{}/{}", API_VERSION, segments.join("/"))
}

/// Percent-decodes one path segment. `+` decodes to a space, as the
/// original query-unescape did.
fn decode_segment(raw: &str) -> EngineResult<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let (high, low) = match (bytes.get(i + 1), bytes.get(i + 2)) {
                    (Some(&high), Some(&low)) => (hex_value(high), hex_value(low)),
                    _ => (None, None),
                };
                match (high, low) {
                    (Some(high), Some(low)) => {
                        out.push(high << 4 | low);
                        i += 3;
                    }
                    _ => return Err(EngineError::decode(raw)),
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| EngineError::decode(raw))
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
