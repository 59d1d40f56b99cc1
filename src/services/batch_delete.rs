//! Bounded batch deletion with completeness checks.

use futures::{StreamExt, pin_mut, stream};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{ConsistencyError, Result};
use crate::services::client::ObjectStoreClient;

/// Protocol ceiling on keys per delete call.
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Clone)]
pub struct BatchDeleter {
    client: Arc<dyn ObjectStoreClient>,
    batch_size: usize,
    concurrency: usize,
}

impl BatchDeleter {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            client,
            batch_size: MAX_DELETE_BATCH,
            concurrency: 1,
        }
    }

    /// Keys per call, clamped to `1..=1000`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_DELETE_BATCH);
        self
    }

    /// Number of delete calls kept in flight. Results are still consumed in
    /// input order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Delete every key, returning how many the store confirmed.
    ///
    /// Each chunk must be confirmed in full. The first short chunk or failed
    /// call stops the operation; nothing is retried.
    pub async fn delete_all(&self, bucket: &str, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let calls = stream::iter(keys.chunks(self.batch_size))
            .map(|chunk| async move {
                let outcome = self.client.delete_objects(bucket, chunk).await;
                (chunk, outcome)
            })
            .buffered(self.concurrency);
        pin_mut!(calls);

        let mut deleted = 0usize;
        while let Some((chunk, outcome)) = calls.next().await {
            let output = outcome?;
            debug!(
                "deleted {}/{} keys from {} ({} errors)",
                output.deleted.len(),
                chunk.len(),
                bucket,
                output.errors.len()
            );
            if output.deleted.len() != chunk.len() || !output.errors.is_empty() {
                let failed: Vec<String> = output.errors.into_iter().map(|e| e.key).collect();
                warn!(
                    "batch delete in {} stopped: chunk of {} confirmed {}, failed keys {:?}",
                    bucket,
                    chunk.len(),
                    output.deleted.len(),
                    failed
                );
                return Err(ConsistencyError::IncompleteDelete {
                    bucket: bucket.to_string(),
                    requested: keys.len(),
                    deleted: deleted + output.deleted.len(),
                    failed,
                }
                .into());
            }
            deleted += output.deleted.len();
        }

        if deleted != keys.len() {
            return Err(ConsistencyError::IncompleteDelete {
                bucket: bucket.to_string(),
                requested: keys.len(),
                deleted,
                failed: Vec::new(),
            }
            .into());
        }
        Ok(deleted)
    }
}
