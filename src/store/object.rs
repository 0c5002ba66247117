//! Stored object metadata and the on-disk naming convention.
//!
//! There is no sidecar index: `original_name` and `created_at_millis` are
//! recovered from the `<millis>-<original>` form of the stored name.

use serde::{Deserialize, Serialize};

/// An object held in custody
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Unique on-disk identifier
    pub stored_name: String,
    /// Name the uploader claimed for the file
    pub original_name: String,
    /// Epoch milliseconds used as the name prefix
    pub created_at_millis: i64,
    /// Bytes written
    pub size_bytes: u64,
}

/// Compose the stored name for an upload
pub fn compose_stored_name(millis: i64, original_name: &str) -> String {
    format!("{}-{}", millis, original_name)
}

/// Split a stored name back into `(created_at_millis, original_name)`.
/// Returns None for entries that do not follow the convention.
pub fn parse_stored_name(stored_name: &str) -> Option<(i64, &str)> {
    let (prefix, original) = stored_name.split_once('-')?;
    if prefix.is_empty() || original.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis = prefix.parse().ok()?;
    Some((millis, original))
}
