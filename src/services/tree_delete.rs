//! Recursive removal of a simulated directory.
//!
//! For every directory: list it, delete its files, remove each sub-directory
//! the same way, then delete the directory's own placeholder. A placeholder
//! is only touched after everything below it has been confirmed deleted.

use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::services::{
    batch_delete::BatchDeleter,
    client::ObjectStoreClient,
    walker::{DirectoryWalker, normalize_prefix},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeDeleteReport {
    pub files_deleted: usize,
    /// Placeholders removed, including the root's when the prefix is non-empty.
    pub directories_deleted: usize,
}

enum Step {
    /// List the directory, delete its files and queue its sub-directories.
    Enter(String),
    /// Every descendant is gone; remove the placeholder.
    Seal(String),
}

#[derive(Clone)]
pub struct TreeDeleter {
    walker: DirectoryWalker,
    deleter: BatchDeleter,
}

impl TreeDeleter {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            walker: DirectoryWalker::new(client.clone()),
            deleter: BatchDeleter::new(client),
        }
    }

    pub fn from_parts(walker: DirectoryWalker, deleter: BatchDeleter) -> Self {
        Self { walker, deleter }
    }

    /// Delete everything below `prefix`, then `prefix` itself.
    ///
    /// The empty prefix clears the bucket but has no placeholder to remove.
    /// The first failure stops the walk; whatever was already deleted stays
    /// deleted.
    pub async fn delete_tree(&self, bucket: &str, prefix: &str) -> Result<TreeDeleteReport> {
        let root = normalize_prefix(prefix);
        let mut report = TreeDeleteReport::default();
        let mut steps = vec![Step::Enter(root.clone())];

        while let Some(step) = steps.pop() {
            match step {
                Step::Enter(dir) => {
                    let listing = self.walker.list_exact(bucket, &dir, None).await?;
                    let keys: Vec<String> = listing.files.into_iter().map(|f| f.key).collect();
                    report.files_deleted += self.deleter.delete_all(bucket, &keys).await?;

                    steps.push(Step::Seal(dir));
                    // reversed so the first listed sub-directory is handled first
                    steps.extend(
                        listing
                            .directories
                            .into_iter()
                            .rev()
                            .map(|sub| Step::Enter(sub.key)),
                    );
                }
                Step::Seal(dir) => {
                    if dir.is_empty() {
                        continue;
                    }
                    self.deleter
                        .delete_all(bucket, std::slice::from_ref(&dir))
                        .await?;
                    report.directories_deleted += 1;
                    debug!("removed directory placeholder {}/{}", bucket, dir);
                }
            }
        }

        info!(
            "deleted tree {}/{}: {} files, {} directories",
            bucket, root, report.files_deleted, report.directories_deleted
        );
        Ok(report)
    }
}
