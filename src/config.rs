use anyhow::{Context, Result};
use std::{env, str::FromStr, time::Duration};

use crate::services::{
    batch_delete::MAX_DELETE_BATCH, registry::DEFAULT_CONFIG_TTL, walker::MAX_LIST_KEYS,
};

/// Centralized configuration, resolved from `COS_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Payload root of the local store.
    pub storage_dir: String,
    /// Metadata database of the local store and the bucket configuration table.
    pub database_url: String,
    /// Bucket used when a caller passes an empty bucket name.
    pub default_bucket: String,
    /// Lifetime of memoized bucket configuration lookups.
    pub config_ttl: Duration,
    pub list_max_keys: usize,
    pub delete_batch_size: usize,
    pub delete_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/cos_objects.db".into(),
            default_bucket: "default".into(),
            config_ttl: DEFAULT_CONFIG_TTL,
            list_max_keys: MAX_LIST_KEYS,
            delete_batch_size: MAX_DELETE_BATCH,
            delete_concurrency: 1,
        }
    }
}

impl AppConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Resolve configuration through `lookup`, falling back to defaults for
    /// unset variables. Sizes are clamped to the store's protocol limits.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let ttl_secs = parse_var(&lookup, "COS_CONFIG_TTL_SECS", defaults.config_ttl.as_secs())?;
        let list_max_keys: usize = parse_var(&lookup, "COS_LIST_MAX_KEYS", defaults.list_max_keys)?;
        let delete_batch_size: usize =
            parse_var(&lookup, "COS_DELETE_BATCH_SIZE", defaults.delete_batch_size)?;
        let delete_concurrency: usize =
            parse_var(&lookup, "COS_DELETE_CONCURRENCY", defaults.delete_concurrency)?;

        Ok(Self {
            storage_dir: lookup("COS_STORAGE_DIR").unwrap_or(defaults.storage_dir),
            database_url: lookup("COS_DATABASE_URL").unwrap_or(defaults.database_url),
            default_bucket: lookup("COS_DEFAULT_BUCKET")
                .filter(|b| !b.trim().is_empty())
                .unwrap_or(defaults.default_bucket),
            config_ttl: Duration::from_secs(ttl_secs),
            list_max_keys: list_max_keys.clamp(1, MAX_LIST_KEYS),
            delete_batch_size: delete_batch_size.clamp(1, MAX_DELETE_BATCH),
            delete_concurrency: delete_concurrency.max(1),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}
