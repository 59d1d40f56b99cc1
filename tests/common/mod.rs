//! Common test utilities: recording stores, config sources and logging.

pub mod mocks;

#[allow(unused_imports)]
pub use mocks::*;

use std::sync::Arc;

use cos_objects::models::bucket::BucketConfig;
use cos_objects::services::registry::{
    ClientRegistry, ConfigResolver, DEFAULT_CONFIG_TTL, MemoryTtlCache, SharedClientFactory,
};
use cos_objects::ObjectStoreClient;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. `RUST_LOG` selects levels.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn bucket_config(id: i64, bucket: &str) -> BucketConfig {
    BucketConfig {
        id,
        bucket: bucket.to_string(),
        region: "ap-guangzhou".into(),
        endpoint: format!("https://{bucket}.cos.ap-guangzhou.example.com/"),
        app_id: "1250000000".into(),
        secret_id: "AKIDtest".into(),
        secret_key: "secret-key".into(),
        cdn: String::new(),
        cdn_secret: String::new(),
    }
}

/// Registry whose every configured bucket is served by `store`.
#[allow(dead_code)]
pub fn registry_for(
    store: Arc<dyn ObjectStoreClient>,
    configs: Vec<BucketConfig>,
) -> (Arc<ClientRegistry>, Arc<StaticConfigs>) {
    let source = StaticConfigs::new(configs);
    let resolver = ConfigResolver::new(
        source.clone(),
        Arc::new(MemoryTtlCache::<BucketConfig>::new()),
        DEFAULT_CONFIG_TTL,
    );
    let registry = ClientRegistry::new(resolver, Arc::new(SharedClientFactory(store)));
    (Arc::new(registry), source)
}
