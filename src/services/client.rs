//! The object store interface consumed by the tree engine and upload service.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::StoreResult;
use crate::models::wire::{
    CopySource, DeleteObjectsOutput, ListObjectsOutput, ListObjectsRequest, PutObjectOutput,
};

/// A bucket-style store addressed by flat keys.
///
/// Implementations must be safe to share between concurrent operations and must
/// not cache listings.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync + 'static {
    /// Fetch one page of keys under `request.prefix`.
    ///
    /// With a delimiter, keys containing it after the prefix are grouped into
    /// `common_prefixes` instead of `contents`.
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ListObjectsOutput>;

    /// Delete up to 1000 keys in one call.
    ///
    /// Keys that do not exist are reported as deleted.
    async fn delete_objects(&self, bucket: &str, keys: &[String])
    -> StoreResult<DeleteObjectsOutput>;

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes)
    -> StoreResult<PutObjectOutput>;

    /// Server-side copy of `source` into `bucket/key`.
    async fn copy_object(&self, bucket: &str, key: &str, source: &CopySource) -> StoreResult<()>;

    /// Short backend identifier used in logs.
    fn backend_name(&self) -> &'static str {
        "object-store"
    }
}
