//! Represents one file as known to a storage backend.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback MIME type when neither the uploader nor the backend supplies one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A single stored file, independent of which gateway produced it.
///
/// `StoredObject` carries metadata only; a download hands it back together
/// with the payload as a [`StoredFile`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Backend-unique identifier within the configured scope.
    pub storage_key: String,

    /// Name the user uploaded the file under.
    pub display_name: String,

    /// Payload size in bytes.
    pub size_bytes: u64,

    /// Creation time, when the backend tracks one.
    pub created_at: Option<DateTime<Utc>>,

    /// Last modification time, used when `created_at` is missing.
    pub modified_at: Option<DateTime<Utc>>,

    /// Best-effort MIME type.
    pub content_type: String,
}

impl StoredObject {
    /// Timestamp the listing is ordered by.
    pub fn sort_time(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.modified_at)
    }
}

/// Payload of one object plus the metadata resolved by the same backend call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub object: StoredObject,
    pub bytes: Bytes,
}

/// Normalise an optional, possibly blank content type.
pub fn content_type_or_default(content_type: Option<&str>) -> String {
    content_type
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
