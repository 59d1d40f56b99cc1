//! src/services/storage_service.rs
//!
//! LocalObjectStore: an object store backed by SQLite for metadata and local
//! disk for payloads, sharded beneath `base_path/{bucket}/{shard}/{shard}/{md5(bucket/key)}`.
//! It implements [`ObjectStoreClient`] so listing, batch deletes and copies
//! behave like a bucket-style remote store: flat keys, delimiter grouping,
//! continuation markers and idempotent deletes.

use anyhow::Context as _;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::{
    QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{StoreError, StoreResult};
use crate::models::{
    bucket::BucketRecord,
    object::StoredObject,
    wire::{
        CopySource, DeleteFailure, DeleteObjectsOutput, ListObjectsOutput, ListObjectsRequest,
        ObjectSummary, PutObjectOutput,
    },
};
use crate::services::client::ObjectStoreClient;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_LIST_KEYS: usize = 1000;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str =
    "id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted";

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Create directories, connect to the metadata database and apply the schema.
    pub async fn open(cfg: &AppConfig) -> anyhow::Result<Self> {
        if !Path::new(&cfg.storage_dir).exists() {
            fs::create_dir_all(&cfg.storage_dir)
                .await
                .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
            info!("Created storage directory at {}", cfg.storage_dir);
        }

        let db_path = cfg
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
                info!("Created missing directory {:?}", parent);
            }
        }

        let options = SqliteConnectOptions::from_str(&cfg.database_url)
            .with_context(|| format!("parsing database url `{}`", cfg.database_url))?
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?;

        let store = Self::new(Arc::new(db), cfg.storage_dir.clone());
        store.migrate().await.context("applying schema")?;
        Ok(store)
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements...", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Reject keys that are empty, oversized, rooted, contain `..` or control bytes.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Enforce S3-like bucket naming:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - starts and ends with a letter or digit
    /// - no consecutive dots or dot-hyphen pairs
    /// - not shaped like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let reject = |reason: &str| {
            Err(StoreError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return reject("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return reject("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return reject("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return reject("cannot contain consecutive dots or dot-hyphen combinations");
        }
        if is_ipv4_like(name) {
            return reject("must not be formatted like an IP address");
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Payload path for a key. The file name is the MD5 of `bucket/key`, so
    /// placeholder keys ending in `/` need no special casing; the first two
    /// digest bytes shard the directory.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        let mut path = self.bucket_root(bucket_name);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<BucketRecord> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, BucketRecord>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &BucketRecord, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects \
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Stream an object to disk and upsert its metadata.
    ///
    /// Bytes go to a temporary file (MD5 and size computed on the way), which
    /// is fsynced and renamed into place. The temp file is removed on errors.
    pub async fn write_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = write_temp(&tmp_path, stream).await;
        let (size_bytes, etag) = match written {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        let upserted = sqlx::query_as::<_, StoredObject>(&format!(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match upserted {
            Ok(obj) => {
                debug!("stored {}/{} ({} bytes)", bucket, key, obj.size_bytes);
                Ok(obj)
            }
            Err(err) => {
                // the payload may already back a live row; never remove it here
                warn!("metadata write for {}/{} failed: {}", bucket, key, err);
                Err(StoreError::Sqlx(err))
            }
        }
    }

    /// Metadata and an open payload handle for a live object.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Whole payload of a live object.
    pub async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let (_, file) = self.get_object_reader(bucket, key).await?;
        let mut body = Vec::new();
        let stream = ReaderStream::new(file);
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(body))
    }

    /// Create a bucket and its payload directory.
    pub async fn create_bucket(&self, name: &str, region: &str) -> StoreResult<BucketRecord> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = BucketRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            region: region.to_lowercase(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(&bucket.region)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// One page of keys in ascending order, grouped on the delimiter.
    ///
    /// Listing resumes strictly after `marker`. When the marker falls inside a
    /// grouped prefix that group has already been reported and is skipped.
    async fn list_page(&self, request: &ListObjectsRequest) -> StoreResult<ListObjectsOutput> {
        let bucket_rec = self.fetch_bucket(&request.bucket).await?;
        let max_keys = request.max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket_id = "
        ));
        builder.push_bind(bucket_rec.id);
        builder.push(" AND is_deleted = 0");
        if !prefix.is_empty() {
            // instr() keeps the match literal and case-sensitive, unlike LIKE
            builder.push(" AND instr(key, ");
            builder.push_bind(prefix.to_string());
            builder.push(") = 1");
        }
        if let Some(marker) = &request.marker {
            builder.push(" AND key > ");
            builder.push_bind(marker.clone());
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;

        let is_truncated = rows.len() == fetch_limit;
        if is_truncated {
            rows.pop();
        }
        let next_marker = if is_truncated {
            rows.last().map(|obj| obj.key.clone())
        } else {
            None
        };

        let marker_group = match (delimiter, &request.marker) {
            (Some(delim), Some(marker)) => compute_common_prefix(marker, prefix, delim),
            _ => None,
        };

        let mut contents: Vec<ObjectSummary> = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for obj in rows {
            if let Some(delim) = delimiter {
                if let Some(group) = compute_common_prefix(&obj.key, prefix, delim) {
                    if marker_group.as_deref() != Some(group.as_str()) {
                        common_prefixes.insert(group);
                    }
                    continue;
                }
            }
            contents.push(obj.into());
        }

        Ok(ListObjectsOutput {
            contents,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_marker,
        })
    }

    /// Soft-delete one key and remove its payload. Missing keys are not an error.
    async fn remove_object(&self, bucket: &BucketRecord, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let result = sqlx::query(
            "UPDATE objects SET is_deleted = 1 WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket.id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!("{}/{} already absent", bucket.name, key);
            return Ok(());
        }

        let file_path = self.object_path(&bucket.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(&bucket.name))
                .await;
        }
        Ok(())
    }

    /// Remove empty shard directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStoreClient for LocalObjectStore {
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ListObjectsOutput> {
        self.list_page(request).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StoreResult<DeleteObjectsOutput> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let mut output = DeleteObjectsOutput::default();
        for key in keys {
            match self.remove_object(&bucket_rec, key).await {
                Ok(()) => output.deleted.push(key.clone()),
                Err(err) => {
                    let code = match &err {
                        StoreError::InvalidObjectKey(_) => "InvalidArgument",
                        _ => "InternalError",
                    };
                    output.errors.push(DeleteFailure {
                        key: key.clone(),
                        code: code.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(output)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> StoreResult<PutObjectOutput> {
        let body = stream::once(async move { Ok::<_, io::Error>(body) });
        let obj = self.write_object_stream(bucket, key, None, body).await?;
        Ok(PutObjectOutput {
            key: obj.key,
            etag: obj.etag,
        })
    }

    async fn copy_object(&self, bucket: &str, key: &str, source: &CopySource) -> StoreResult<()> {
        let (meta, file) = self.get_object_reader(&source.bucket, &source.key).await?;
        self.write_object_stream(bucket, key, meta.content_type, ReaderStream::new(file))
            .await?;
        debug!("copied {} to {}/{}", source.descriptor(), bucket, key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Write a byte stream to `path`, returning its size and hex MD5.
async fn write_temp<S>(path: &Path, stream: S) -> io::Result<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut digest = Context::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        digest.consume(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size_bytes, format!("{:x}", digest.compute())))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// The grouped prefix `key` falls under, if any: `prefix` plus everything up to
/// and including the first delimiter after it.
fn compute_common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!(
        "{}{}",
        prefix,
        &after_prefix[..pos + delimiter.len()]
    ))
}

/// Dotted-quad check used to reject IP-shaped bucket names.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
