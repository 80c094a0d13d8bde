//! Metadata row for an object held in the bucket backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Row in the `objects` table.
///
/// The bucket backend keeps payload bytes on disk and everything else here.
/// `key` is the encoded storage key; the display name is never stored and is
/// always recovered from the key.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Encoded storage key (unique among live rows).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp when the object was uploaded.
    pub created_at: DateTime<Utc>,

    /// Soft-delete marker.
    pub is_deleted: bool,
}
