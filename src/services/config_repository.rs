//! Bucket configurations persisted in SQLite.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::errors::{Result, StoreError};
use crate::models::bucket::BucketConfig;
use crate::services::registry::BucketConfigSource;

const SELECT_CONFIG: &str = "SELECT id, bucket, region, endpoint, app_id, secret_id, secret_key, \
     cdn, cdn_secret FROM bucket_configs";

#[derive(Clone)]
pub struct SqliteBucketConfigs {
    db: Arc<SqlitePool>,
}

impl SqliteBucketConfigs {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert or replace the configuration for `config.bucket`; returns its id.
    pub async fn upsert(&self, config: &BucketConfig) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bucket_configs (
                bucket, region, endpoint, app_id, secret_id, secret_key, cdn, cdn_secret
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket) DO UPDATE SET
                region = excluded.region,
                endpoint = excluded.endpoint,
                app_id = excluded.app_id,
                secret_id = excluded.secret_id,
                secret_key = excluded.secret_key,
                cdn = excluded.cdn,
                cdn_secret = excluded.cdn_secret
            RETURNING id
            "#,
        )
        .bind(&config.bucket)
        .bind(&config.region)
        .bind(&config.endpoint)
        .bind(&config.app_id)
        .bind(&config.secret_id)
        .bind(&config.secret_key)
        .bind(&config.cdn)
        .bind(&config.cdn_secret)
        .fetch_one(&*self.db)
        .await
        .map_err(StoreError::from)?;
        Ok(id)
    }
}

#[async_trait]
impl BucketConfigSource for SqliteBucketConfigs {
    async fn by_name(&self, bucket: &str) -> Result<Option<BucketConfig>> {
        let found = sqlx::query_as::<_, BucketConfig>(&format!("{SELECT_CONFIG} WHERE bucket = ?"))
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await
            .map_err(StoreError::from)?;
        Ok(found)
    }

    async fn by_id(&self, id: i64) -> Result<Option<BucketConfig>> {
        let found = sqlx::query_as::<_, BucketConfig>(&format!("{SELECT_CONFIG} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await
            .map_err(StoreError::from)?;
        Ok(found)
    }
}
