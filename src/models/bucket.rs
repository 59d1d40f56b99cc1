//! Buckets: the local store's namespace rows and the connection settings
//! used to reach a remote bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// A bucket known to the local store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct BucketRecord {
    pub id: Uuid,

    /// Bucket name (S3 naming rules).
    pub name: String,

    pub region: String,

    pub created_at: DateTime<Utc>,
}

/// Connection and delivery settings for one bucket.
///
/// Rows live in the `bucket_configs` table; lookups go through
/// [`ConfigResolver`](crate::services::registry::ConfigResolver).
#[derive(Serialize, Deserialize, Clone, FromRow, PartialEq, Eq, Default)]
pub struct BucketConfig {
    pub id: i64,
    pub bucket: String,
    pub region: String,
    /// Origin endpoint, e.g. `https://bucket.example-region.store.com/`.
    pub endpoint: String,
    pub app_id: String,
    pub secret_id: String,
    pub secret_key: String,
    /// CDN base URL, empty when the bucket is served from its endpoint.
    pub cdn: String,
    /// Shared secret for signed CDN links (6 to 40 alphanumerics).
    pub cdn_secret: String,
}

impl BucketConfig {
    /// Base URL objects are served from: the CDN when configured, else the endpoint.
    pub fn public_base(&self) -> &str {
        if self.cdn.is_empty() {
            &self.endpoint
        } else {
            &self.cdn
        }
    }
}

impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field("cdn", &self.cdn)
            .field("cdn_secret", &"<redacted>")
            .finish()
    }
}
