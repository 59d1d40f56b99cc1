//! Uploads, links and structural operations against configured buckets.
//!
//! Every call names a bucket; its client comes from the [`ClientRegistry`] and
//! its CDN settings from the registry's [`ConfigResolver`](super::registry::ConfigResolver).

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::Utc;
use std::{path::Path, sync::Arc};
use tokio::fs;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{ConsistencyError, Error, Result, StoreError};
use crate::models::{
    entry::{DirectoryTree, Listing},
    wire::CopySource,
};
use crate::services::{
    batch_delete::{BatchDeleter, MAX_DELETE_BATCH},
    etag::{self, ContentKey},
    registry::{BucketConfigSource, ClientFactory, ClientRegistry},
    tree_delete::{TreeDeleteReport, TreeDeleter},
    walker::{DirectoryWalker, MAX_LIST_KEYS, normalize_prefix},
};

const DATA_URI_PREFIX: &str = "data:image";
/// `data:image/<ext>;base64` with an extension of at least two characters.
const MIN_DATA_URI_HEADER: usize = 20;
const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

pub struct UploadService {
    registry: Arc<ClientRegistry>,
    default_bucket: String,
    list_max_keys: usize,
    delete_batch_size: usize,
    delete_concurrency: usize,
}

impl UploadService {
    pub fn new(registry: Arc<ClientRegistry>, default_bucket: impl Into<String>) -> Self {
        Self {
            registry,
            default_bucket: default_bucket.into(),
            list_max_keys: MAX_LIST_KEYS,
            delete_batch_size: MAX_DELETE_BATCH,
            delete_concurrency: 1,
        }
    }

    pub fn from_config(registry: Arc<ClientRegistry>, cfg: &AppConfig) -> Self {
        Self {
            registry,
            default_bucket: cfg.default_bucket.clone(),
            list_max_keys: cfg.list_max_keys,
            delete_batch_size: cfg.delete_batch_size,
            delete_concurrency: cfg.delete_concurrency,
        }
    }

    /// Service with its own registry over `source`, sized and timed by `cfg`.
    pub fn connect(
        source: Arc<dyn BucketConfigSource>,
        factory: Arc<dyn ClientFactory>,
        cfg: &AppConfig,
    ) -> Self {
        let registry = ClientRegistry::from_config(source, factory, cfg);
        Self::from_config(Arc::new(registry), cfg)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    fn bucket_or_default<'a>(&'a self, bucket: &'a str) -> &'a str {
        if bucket.trim().is_empty() {
            &self.default_bucket
        } else {
            bucket
        }
    }

    async fn walker(&self, bucket: &str) -> Result<DirectoryWalker> {
        let client = self.registry.client(bucket).await?;
        Ok(DirectoryWalker::new(client).with_max_keys(self.list_max_keys))
    }

    async fn deleter(&self, bucket: &str) -> Result<BatchDeleter> {
        let client = self.registry.client(bucket).await?;
        Ok(BatchDeleter::new(client)
            .with_batch_size(self.delete_batch_size)
            .with_concurrency(self.delete_concurrency))
    }

    /// Upload the file at `path` under `directory/<content key>.extension`.
    ///
    /// Returns the object key reported by the store.
    pub async fn upload_file(
        &self,
        bucket: &str,
        directory: &str,
        extension: &str,
        path: impl AsRef<Path>,
    ) -> Result<String> {
        let path = path.as_ref();
        // one read, so the key always describes the bytes sent
        let body = Bytes::from(fs::read(path).await?);
        if body.is_empty() {
            return Err(Error::EmptyUpload(path.display().to_string()));
        }
        let content_key = etag::digest_bytes(&body);
        self.put_keyed(bucket, directory, extension, content_key, body)
            .await
    }

    /// Upload an in-memory payload the same way as [`upload_file`](Self::upload_file).
    pub async fn upload_bytes(
        &self,
        bucket: &str,
        directory: &str,
        extension: &str,
        body: impl Into<Bytes>,
    ) -> Result<String> {
        let body = body.into();
        if body.is_empty() {
            return Err(Error::EmptyUpload(format!(
                "payload for `{}`",
                directory.trim_matches('/')
            )));
        }
        let content_key = etag::digest_bytes(&body);
        self.put_keyed(bucket, directory, extension, content_key, body)
            .await
    }

    /// Upload a base64 image, raw or as a `data:image/<ext>;base64,<payload>` URI.
    ///
    /// The extension comes from the URI header, `jpg` otherwise.
    pub async fn upload_base64_image(
        &self,
        bucket: &str,
        directory: &str,
        data: &str,
    ) -> Result<String> {
        let (extension, payload) = split_data_uri(data)?;
        let bytes = STANDARD.decode(payload.trim())?;
        self.upload_bytes(bucket, directory, extension, bytes).await
    }

    async fn put_keyed(
        &self,
        bucket: &str,
        directory: &str,
        extension: &str,
        content_key: ContentKey,
        body: Bytes,
    ) -> Result<String> {
        let bucket = self.bucket_or_default(bucket);
        let key = content_key.object_key(directory, extension);
        let size = body.len();
        let client = self.registry.client(bucket).await?;
        let output = client.put_object(bucket, &key, body).await?;
        info!("uploaded {} bytes to {}/{}", size, bucket, output.key);
        Ok(output.key)
    }

    /// Public link: the bucket's CDN (or endpoint) joined with `key`.
    pub async fn url(&self, bucket: &str, key: &str) -> Result<String> {
        let config = self.registry.resolver().require_by_name(bucket).await?;
        Ok(join_url(config.public_base(), key))
    }

    /// CDN link signed for the current time.
    pub async fn temp_url(&self, bucket: &str, key: &str) -> Result<String> {
        self.temp_url_at(bucket, key, Utc::now().timestamp()).await
    }

    /// CDN link signed as `md5(cdn_secret + "/" + key + timestamp)`.
    pub async fn temp_url_at(&self, bucket: &str, key: &str, timestamp: i64) -> Result<String> {
        let config = self.registry.resolver().require_by_name(bucket).await?;
        if config.cdn.is_empty() {
            return Err(Error::ConfigNotFound(format!(
                "bucket `{bucket}` has no CDN for signed links"
            )));
        }
        let key = key.trim_start_matches('/');
        let digest = md5::compute(format!("{}/{}{}", config.cdn_secret, key, timestamp));
        Ok(format!(
            "{}?sign={:x}&t={}",
            join_url(&config.cdn, key),
            digest,
            timestamp
        ))
    }

    /// Server-side copy of `src_bucket/src_key` to `dest_bucket/dest_key`.
    pub async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        let source_config = self.registry.resolver().require_by_name(src_bucket).await?;
        let source = CopySource {
            bucket: src_bucket.to_string(),
            region: source_config.region,
            key: src_key.to_string(),
        };
        let client = self.registry.client(dest_bucket).await?;
        client.copy_object(dest_bucket, dest_key, &source).await?;
        info!(
            "copied {} to {}/{}",
            source.descriptor(),
            dest_bucket,
            dest_key
        );
        Ok(())
    }

    /// [`copy`](Self::copy) reporting only whether it succeeded.
    pub async fn copied(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> bool {
        match self.copy(src_bucket, src_key, dest_bucket, dest_key).await {
            Ok(()) => true,
            Err(err) => {
                warn!("copy {}/{} failed: {}", src_bucket, src_key, err);
                false
            }
        }
    }

    /// Copy then delete the source.
    ///
    /// Not atomic. When the copy succeeds but the source cannot be deleted the
    /// object is left at both keys and `ConsistencyError::PartialRename` is
    /// returned; nothing is rolled back.
    pub async fn rename(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<()> {
        self.copy(src_bucket, src_key, dest_bucket, dest_key).await?;

        let removed = match self.deleter(src_bucket).await {
            Ok(deleter) => deleter
                .delete_all(src_bucket, &[src_key.to_string()])
                .await
                .map(|_| ()),
            Err(err) => Err(err),
        };
        removed.map_err(|err| {
            warn!(
                "rename left {}/{} in place after copying it: {}",
                src_bucket, src_key, err
            );
            Error::from(ConsistencyError::PartialRename {
                from: format!("{src_bucket}/{src_key}"),
                to: format!("{dest_bucket}/{dest_key}"),
                source: Box::new(err),
            })
        })
    }

    pub async fn renamed(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> bool {
        match self.rename(src_bucket, src_key, dest_bucket, dest_key).await {
            Ok(()) => true,
            Err(err) => {
                warn!("rename {}/{} failed: {}", src_bucket, src_key, err);
                false
            }
        }
    }

    /// Write the zero-byte placeholder for directory `name`; returns its key.
    pub async fn create_directory(&self, bucket: &str, name: &str) -> Result<String> {
        let key = normalize_prefix(name);
        if key.is_empty() {
            return Err(StoreError::InvalidObjectKey(name.to_string()).into());
        }
        let client = self.registry.client(bucket).await?;
        client.put_object(bucket, &key, Bytes::new()).await?;
        info!("created directory {}/{}", bucket, key);
        Ok(key)
    }

    pub async fn list(&self, bucket: &str, prefix: &str, marker: Option<&str>) -> Result<Listing> {
        self.walker(bucket).await?.list(bucket, prefix, marker).await
    }

    pub async fn tree(&self, bucket: &str, prefix: &str) -> Result<DirectoryTree> {
        self.walker(bucket).await?.tree(bucket, prefix).await
    }

    /// Delete `keys` in bounded batches; returns the confirmed count.
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<usize> {
        self.deleter(bucket).await?.delete_all(bucket, keys).await
    }

    pub async fn delete_tree(&self, bucket: &str, prefix: &str) -> Result<TreeDeleteReport> {
        let walker = self.walker(bucket).await?;
        let deleter = self.deleter(bucket).await?;
        TreeDeleter::from_parts(walker, deleter)
            .delete_tree(bucket, prefix)
            .await
    }

    /// [`delete_tree`](Self::delete_tree) reporting only whether it succeeded.
    pub async fn tree_deleted(&self, bucket: &str, prefix: &str) -> bool {
        match self.delete_tree(bucket, prefix).await {
            Ok(_) => true,
            Err(err) => {
                warn!("deleting tree {}/{} failed: {}", bucket, prefix, err);
                false
            }
        }
    }
}

/// Split an image payload into `(extension, base64)`.
fn split_data_uri(data: &str) -> Result<(&str, &str)> {
    if !data.starts_with(DATA_URI_PREFIX) {
        return Ok((DEFAULT_IMAGE_EXTENSION, data));
    }
    let (header, payload) = match data.split_once(',') {
        Some((header, payload)) if header.len() >= MIN_DATA_URI_HEADER && !payload.is_empty() => {
            (header, payload)
        }
        _ => return Err(Error::Decode("illegal base64 image".into())),
    };
    let extension = header
        .strip_prefix("data:image/")
        .map(|rest| rest.strip_suffix(";base64").unwrap_or(rest))
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_IMAGE_EXTENSION);
    Ok((extension, payload))
}

fn join_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}
