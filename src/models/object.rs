//! Metadata row for an object held by the local store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::wire::ObjectSummary;

/// A single stored object (its metadata, not its bytes).
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Full path-like key within the bucket.
    pub key: String,

    /// Content type (MIME type), if the writer supplied one.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    pub last_modified: DateTime<Utc>,

    /// Soft-delete marker.
    pub is_deleted: bool,
}

impl From<StoredObject> for ObjectSummary {
    fn from(obj: StoredObject) -> Self {
        ObjectSummary {
            key: obj.key,
            size: u64::try_from(obj.size_bytes).unwrap_or(0),
            last_modified: Some(obj.last_modified),
            etag: obj.etag,
        }
    }
}
