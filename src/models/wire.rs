//! Request and response shapes of the object store interface.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Parameters of one `ListObjects` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    /// Continuation marker from the previous page; listing resumes after it.
    pub marker: Option<String>,
}

/// A leaf object as reported by a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListObjectsOutput {
    pub contents: Vec<ObjectSummary>,
    /// Grouped key prefixes, each ending with the delimiter.
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Result of one batch delete call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteObjectsOutput {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub key: String,
    pub etag: Option<String>,
}

/// Where a server-side copy reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopySource {
    pub bucket: String,
    pub region: String,
    pub key: String,
}

impl CopySource {
    /// `bucket/key` form accepted by S3-style copy headers.
    pub fn descriptor(&self) -> String {
        format!("{}/{}", self.bucket, self.key.trim_start_matches('/'))
    }
}
