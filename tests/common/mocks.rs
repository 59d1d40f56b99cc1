use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use cos_objects::errors::{Result, StoreError, StoreResult};
use cos_objects::models::bucket::BucketConfig;
use cos_objects::models::wire::{
    CopySource, DeleteFailure, DeleteObjectsOutput, ListObjectsOutput, ListObjectsRequest,
    ObjectSummary, PutObjectOutput,
};
use cos_objects::services::client::ObjectStoreClient;
use cos_objects::services::registry::BucketConfigSource;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One call received by a mock store.
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    List {
        prefix: String,
        marker: Option<String>,
    },
    Delete(Vec<String>),
    Put(String),
    Copy {
        to: String,
        from: String,
    },
}

/// In-memory bucket store with S3-style delimiter listing.
///
/// Records every call and can be told to fail list calls or refuse deleting
/// specific keys.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Bytes>>>,
    calls: Mutex<Vec<Call>>,
    lists_before_failure: Mutex<Option<usize>>,
    refused: Mutex<HashSet<String>>,
    fail_copies: Mutex<bool>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store `key` with `body` in `bucket`.
    pub fn seed(&self, bucket: &str, key: &str, body: &[u8]) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), Bytes::copy_from_slice(body));
    }

    pub fn seed_files(&self, bucket: &str, keys: &[&str]) {
        for key in keys {
            self.seed(bucket, key, key.as_bytes());
        }
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Keys of every delete call, one entry per call.
    pub fn delete_batches(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(keys) => Some(keys),
                _ => None,
            })
            .collect()
    }

    /// Keys in the order they were submitted for deletion.
    pub fn deletion_order(&self) -> Vec<String> {
        self.delete_batches().into_iter().flatten().collect()
    }

    pub fn list_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::List { .. }))
            .count()
    }

    /// Let `n` list calls succeed, then fail every later one.
    pub fn fail_lists_after(&self, n: usize) {
        *self.lists_before_failure.lock().unwrap() = Some(n);
    }

    /// Report `key` as not deleted in every delete call.
    pub fn refuse_delete(&self, key: &str) {
        self.refused.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_copies(&self) {
        *self.fail_copies.lock().unwrap() = true;
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryStore {
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ListObjectsOutput> {
        self.record(Call::List {
            prefix: request.prefix.clone(),
            marker: request.marker.clone(),
        });
        {
            let mut remaining = self.lists_before_failure.lock().unwrap();
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    return Err(StoreError::Service {
                        code: "InternalError".into(),
                        message: "injected list failure".into(),
                    });
                }
                *n -= 1;
            }
        }

        let buckets = self.buckets.lock().unwrap();
        let Some(objects) = buckets.get(&request.bucket) else {
            return Err(StoreError::BucketNotFound(request.bucket.clone()));
        };
        let prefix = request.prefix.as_str();
        let marker = request.marker.as_deref();
        let delimiter = request.delimiter.as_deref();

        let mut output = ListObjectsOutput::default();
        let mut emitted = 0usize;
        let mut last = None::<String>;
        for (key, body) in objects.iter() {
            if !key.starts_with(prefix) || marker.is_some_and(|m| key.as_str() <= m) {
                continue;
            }
            let group = delimiter.and_then(|d| {
                key[prefix.len()..]
                    .find(d)
                    .map(|pos| key[..prefix.len() + pos + d.len()].to_string())
            });
            if let Some(group) = &group {
                // already reported on this page or before the marker
                if output.common_prefixes.last() == Some(group)
                    || marker.is_some_and(|m| m.starts_with(group.as_str()))
                {
                    continue;
                }
            }
            if emitted == request.max_keys {
                output.is_truncated = true;
                output.next_marker = last;
                return Ok(output);
            }
            emitted += 1;
            match group {
                Some(group) => {
                    last = Some(group.clone());
                    output.common_prefixes.push(group);
                }
                None => {
                    last = Some(key.clone());
                    output.contents.push(ObjectSummary {
                        key: key.clone(),
                        size: body.len() as u64,
                        last_modified: Utc.timestamp_opt(1_700_000_000, 0).single(),
                        etag: Some(format!("\"{:x}\"", md5::compute(body))),
                    });
                }
            }
        }
        Ok(output)
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StoreResult<DeleteObjectsOutput> {
        self.record(Call::Delete(keys.to_vec()));
        let refused = self.refused.lock().unwrap().clone();
        let mut buckets = self.buckets.lock().unwrap();
        let objects = buckets.entry(bucket.to_string()).or_default();

        let mut output = DeleteObjectsOutput::default();
        for key in keys {
            if refused.contains(key) {
                output.errors.push(DeleteFailure {
                    key: key.clone(),
                    code: "AccessDenied".into(),
                    message: "injected delete refusal".into(),
                });
                continue;
            }
            objects.remove(key);
            output.deleted.push(key.clone());
        }
        Ok(output)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
    ) -> StoreResult<PutObjectOutput> {
        self.record(Call::Put(key.to_string()));
        let etag = format!("\"{:x}\"", md5::compute(&body));
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
        Ok(PutObjectOutput {
            key: key.to_string(),
            etag: Some(etag),
        })
    }

    async fn copy_object(&self, bucket: &str, key: &str, source: &CopySource) -> StoreResult<()> {
        self.record(Call::Copy {
            to: format!("{bucket}/{key}"),
            from: source.descriptor(),
        });
        if *self.fail_copies.lock().unwrap() {
            return Err(StoreError::Service {
                code: "AccessDenied".into(),
                message: "injected copy failure".into(),
            });
        }
        let mut buckets = self.buckets.lock().unwrap();
        let body = buckets
            .get(&source.bucket)
            .and_then(|objects| objects.get(&source.key))
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: source.bucket.clone(),
                key: source.key.clone(),
            })?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Store that answers list calls from a fixed script of pages, in order,
/// regardless of the request. Other operations fail.
#[allow(dead_code)]
pub struct ScriptedListStore {
    pages: Mutex<Vec<ListObjectsOutput>>,
    requests: Mutex<Vec<ListObjectsRequest>>,
}

#[allow(dead_code)]
impl ScriptedListStore {
    pub fn new(pages: Vec<ListObjectsOutput>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into_iter().rev().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ListObjectsRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn markers(&self) -> Vec<Option<String>> {
        self.requests().into_iter().map(|r| r.marker).collect()
    }
}

fn unscripted<T>() -> StoreResult<T> {
    Err(StoreError::Service {
        code: "NotImplemented".into(),
        message: "scripted store only lists".into(),
    })
}

#[async_trait]
impl ObjectStoreClient for ScriptedListStore {
    async fn list_objects(&self, request: &ListObjectsRequest) -> StoreResult<ListObjectsOutput> {
        self.requests.lock().unwrap().push(request.clone());
        self.pages.lock().unwrap().pop().ok_or_else(|| StoreError::Service {
            code: "InternalError".into(),
            message: "script exhausted".into(),
        })
    }

    async fn delete_objects(
        &self,
        _bucket: &str,
        _keys: &[String],
    ) -> StoreResult<DeleteObjectsOutput> {
        unscripted()
    }

    async fn put_object(
        &self,
        _bucket: &str,
        _key: &str,
        _body: Bytes,
    ) -> StoreResult<PutObjectOutput> {
        unscripted()
    }

    async fn copy_object(
        &self,
        _bucket: &str,
        _key: &str,
        _source: &CopySource,
    ) -> StoreResult<()> {
        unscripted()
    }
}

/// Build a listing page from keys (`size` = key length) and grouped prefixes.
#[allow(dead_code)]
pub fn page(keys: &[&str], prefixes: &[&str], next_marker: Option<&str>) -> ListObjectsOutput {
    ListObjectsOutput {
        contents: keys
            .iter()
            .map(|key| ObjectSummary {
                key: key.to_string(),
                size: key.len() as u64,
                last_modified: None,
                etag: None,
            })
            .collect(),
        common_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        is_truncated: next_marker.is_some(),
        next_marker: next_marker.map(str::to_string),
    }
}

/// Fixed bucket configurations with a lookup counter.
#[allow(dead_code)]
pub struct StaticConfigs {
    configs: Vec<BucketConfig>,
    lookups: AtomicUsize,
}

#[allow(dead_code)]
impl StaticConfigs {
    pub fn new(configs: Vec<BucketConfig>) -> Arc<Self> {
        Arc::new(Self {
            configs,
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BucketConfigSource for StaticConfigs {
    async fn by_name(&self, bucket: &str) -> Result<Option<BucketConfig>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.configs.iter().find(|c| c.bucket == bucket).cloned())
    }

    async fn by_id(&self, id: i64) -> Result<Option<BucketConfig>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.configs.iter().find(|c| c.id == id).cloned())
    }
}
