//! Bucket configuration lookup and per-bucket client handles.
//!
//! Both are explicit objects owned by the caller: a [`ConfigResolver`] memoizes
//! lookups in an injected [`TtlCache`], and a [`ClientRegistry`] keeps one
//! connected client per bucket name.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{Error, Result};
use crate::models::bucket::BucketConfig;
use crate::services::client::ObjectStoreClient;

/// Default lifetime of a memoized configuration.
pub const DEFAULT_CONFIG_TTL: Duration = Duration::from_secs(180);

const BY_NAME_KEY: &str = "get_bucket_by_name";
const BY_ID_KEY: &str = "get_bucket_by_id";

/// A key-value cache whose entries expire.
pub trait TtlCache<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn insert(&self, key: String, value: V, ttl: Duration);
    fn remove(&self, key: &str);
}

/// In-process [`TtlCache`]. Expired entries are dropped when read.
pub struct MemoryTtlCache<V> {
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V> MemoryTtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryTtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> TtlCache<V> for MemoryTtlCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((expires, value)) if Instant::now() < *expires => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: String, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, (Instant::now() + ttl, value));
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }
}

/// Where bucket configurations are stored.
#[async_trait]
pub trait BucketConfigSource: Send + Sync {
    async fn by_name(&self, bucket: &str) -> Result<Option<BucketConfig>>;
    async fn by_id(&self, id: i64) -> Result<Option<BucketConfig>>;
}

/// Memoizing front for a [`BucketConfigSource`]. Misses are not cached.
#[derive(Clone)]
pub struct ConfigResolver {
    source: Arc<dyn BucketConfigSource>,
    cache: Arc<dyn TtlCache<BucketConfig>>,
    ttl: Duration,
}

impl ConfigResolver {
    pub fn new(
        source: Arc<dyn BucketConfigSource>,
        cache: Arc<dyn TtlCache<BucketConfig>>,
        ttl: Duration,
    ) -> Self {
        Self { source, cache, ttl }
    }

    pub async fn by_name(&self, bucket: &str) -> Result<Option<BucketConfig>> {
        let cache_key = format!("{BY_NAME_KEY}:{bucket}");
        if let Some(config) = self.cache.get(&cache_key) {
            return Ok(Some(config));
        }
        let found = self.source.by_name(bucket).await?;
        if let Some(config) = &found {
            debug!("caching configuration of bucket {}", bucket);
            self.cache.insert(cache_key, config.clone(), self.ttl);
        }
        Ok(found)
    }

    pub async fn by_id(&self, id: i64) -> Result<Option<BucketConfig>> {
        let cache_key = format!("{BY_ID_KEY}:{id}");
        if let Some(config) = self.cache.get(&cache_key) {
            return Ok(Some(config));
        }
        let found = self.source.by_id(id).await?;
        if let Some(config) = &found {
            self.cache.insert(cache_key, config.clone(), self.ttl);
        }
        Ok(found)
    }

    pub async fn require_by_name(&self, bucket: &str) -> Result<BucketConfig> {
        self.by_name(bucket)
            .await?
            .ok_or_else(|| Error::ConfigNotFound(format!("bucket `{bucket}`")))
    }

    pub async fn require_by_id(&self, id: i64) -> Result<BucketConfig> {
        self.by_id(id)
            .await?
            .ok_or_else(|| Error::ConfigNotFound(format!("bucket id {id}")))
    }

    /// Drop memoized entries for `config` so the next lookup hits the source.
    pub fn invalidate(&self, config: &BucketConfig) {
        self.cache.remove(&format!("{BY_NAME_KEY}:{}", config.bucket));
        self.cache.remove(&format!("{BY_ID_KEY}:{}", config.id));
    }
}

/// Builds a store client from a bucket's configuration.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, config: &BucketConfig) -> Result<Arc<dyn ObjectStoreClient>>;
}

/// Factory handing out one shared client for every bucket, for stores that
/// serve all buckets from a single handle.
pub struct SharedClientFactory(pub Arc<dyn ObjectStoreClient>);

#[async_trait]
impl ClientFactory for SharedClientFactory {
    async fn connect(&self, _config: &BucketConfig) -> Result<Arc<dyn ObjectStoreClient>> {
        Ok(self.0.clone())
    }
}

/// Bucket name to connected client.
pub struct ClientRegistry {
    resolver: ConfigResolver,
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<String, Arc<dyn ObjectStoreClient>>>,
}

impl ClientRegistry {
    pub fn new(resolver: ConfigResolver, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            resolver,
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Registry over `source` that memoizes configurations in process for
    /// `cfg.config_ttl`.
    pub fn from_config(
        source: Arc<dyn BucketConfigSource>,
        factory: Arc<dyn ClientFactory>,
        cfg: &AppConfig,
    ) -> Self {
        let cache = Arc::new(MemoryTtlCache::<BucketConfig>::new());
        Self::new(ConfigResolver::new(source, cache, cfg.config_ttl), factory)
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Client for `bucket`, connecting on first use.
    ///
    /// Fails with `ConfigNotFound` when the bucket has no configuration.
    pub async fn client(&self, bucket: &str) -> Result<Arc<dyn ObjectStoreClient>> {
        if let Some(client) = self.cached(bucket) {
            return Ok(client);
        }

        let config = self.resolver.require_by_name(bucket).await?;
        let client = self.factory.connect(&config).await?;
        debug!(
            "connected {} client for bucket {}",
            client.backend_name(),
            bucket
        );

        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        // a concurrent caller may have connected first; keep its handle
        Ok(clients
            .entry(bucket.to_string())
            .or_insert(client)
            .clone())
    }

    /// Install a client without resolving configuration.
    pub fn register(&self, bucket: impl Into<String>, client: Arc<dyn ObjectStoreClient>) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(bucket.into(), client);
    }

    /// Forget the client for `bucket`; the next call reconnects.
    pub fn evict(&self, bucket: &str) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.remove(bucket).is_some()
    }

    fn cached(&self, bucket: &str) -> Option<Arc<dyn ObjectStoreClient>> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.get(bucket).cloned()
    }
}
