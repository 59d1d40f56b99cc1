//! Directory listing over a flat key space.
//!
//! A "directory" is any prefix ending in `/`. One level is listed by asking the
//! store to group keys on the `/` delimiter: grouped prefixes are the
//! sub-directories, the remaining keys are the files. A zero-byte object whose
//! key equals the listed prefix is the directory's own placeholder and is not a
//! file.

use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::models::entry::{DirectoryTree, Listing, ObjectEntry, TreeNode};
use crate::models::wire::ListObjectsRequest;
use crate::services::client::ObjectStoreClient;

pub const DELIMITER: &str = "/";

/// Upper bound on keys per listing call.
pub const MAX_LIST_KEYS: usize = 1000;

/// Trim surrounding slashes and append exactly one, so the prefix always names
/// a directory boundary. The bucket root is the empty prefix.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}{DELIMITER}")
    }
}

/// Parent directory of a normalized prefix (`a/b/` -> `a/`, `a/` -> ``).
fn parent_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => trimmed[..=pos].to_string(),
        None => String::new(),
    }
}

#[derive(Clone)]
pub struct DirectoryWalker {
    client: Arc<dyn ObjectStoreClient>,
    max_keys: usize,
}

impl DirectoryWalker {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            client,
            max_keys: MAX_LIST_KEYS,
        }
    }

    /// Page size for listing calls, clamped to `1..=1000`.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.clamp(1, MAX_LIST_KEYS);
        self
    }

    /// One listing call starting after `marker`.
    ///
    /// When the store reports truncation without a `next_marker`, the greatest
    /// key or common prefix of the page is used instead.
    pub async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<Listing> {
        self.fetch_page(bucket, &normalize_prefix(prefix), marker).await
    }

    /// [`list_page`](Self::list_page) for a prefix sent to the store verbatim.
    async fn fetch_page(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<Listing> {
        let request = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delimiter: Some(DELIMITER.to_string()),
            max_keys: self.max_keys,
            marker: marker.map(str::to_string),
        };
        let page = self.client.list_objects(&request).await?;

        let next_marker = if page.is_truncated {
            page.next_marker.clone().or_else(|| {
                let last_key = page.contents.last().map(|o| o.key.as_str());
                let last_prefix = page.common_prefixes.last().map(String::as_str);
                last_key.max(last_prefix).map(str::to_string)
            })
        } else {
            None
        };

        let files = page
            .contents
            .into_iter()
            .filter(|obj| !(obj.size == 0 && obj.key == prefix))
            .map(|obj| ObjectEntry::file(prefix, obj))
            .collect();
        let directories = page
            .common_prefixes
            .into_iter()
            .map(|dir| ObjectEntry::directory(prefix, dir))
            .collect();

        Ok(Listing {
            files,
            directories,
            is_truncated: page.is_truncated,
            next_marker,
        })
    }

    /// All direct children of `prefix`, following continuation markers from
    /// `marker` (or the start) until the store stops truncating.
    ///
    /// Files of every page come first, then directories, each in page order.
    /// Any failed page fails the whole listing.
    pub async fn list(&self, bucket: &str, prefix: &str, marker: Option<&str>) -> Result<Listing> {
        self.list_exact(bucket, &normalize_prefix(prefix), marker).await
    }

    /// [`list`](Self::list) without normalizing `prefix`.
    ///
    /// Common prefixes reported by the store are listed through here: keys
    /// such as `a//x` or `/x` group under `a//` and `/`, which normalizing
    /// would fold back into their parent.
    pub(crate) async fn list_exact(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
    ) -> Result<Listing> {
        let mut marker = marker.map(str::to_string);
        let mut files = Vec::new();
        let mut directories = Vec::new();
        let mut seen_dirs = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(bucket, prefix, marker.as_deref()).await?;
            pages += 1;
            debug!(
                "listed page {} of {}/{}: {} files, {} directories, truncated={}",
                pages,
                bucket,
                prefix,
                page.files.len(),
                page.directories.len(),
                page.is_truncated
            );

            files.extend(page.files);
            // a marker that lands inside a grouped prefix can make the store repeat it
            for dir in page.directories {
                if seen_dirs.insert(dir.key.clone()) {
                    directories.push(dir);
                }
            }

            if !page.is_truncated {
                break;
            }
            match page.next_marker {
                Some(next) if marker.as_deref() != Some(next.as_str()) => marker = Some(next),
                _ => {
                    return Err(StoreError::StalledListing {
                        prefix: prefix.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(Listing {
            files,
            directories,
            is_truncated: false,
            next_marker: None,
        })
    }

    /// The whole hierarchy below `prefix`.
    pub async fn tree(&self, bucket: &str, prefix: &str) -> Result<DirectoryTree> {
        self.tree_to_depth(bucket, prefix, None).await
    }

    /// Like [`tree`](Self::tree), but directories more than `max_depth` levels
    /// below `prefix` are returned without children.
    ///
    /// Expansion uses an explicit stack, so depth is limited only by memory.
    pub async fn tree_to_depth(
        &self,
        bucket: &str,
        prefix: &str,
        max_depth: Option<usize>,
    ) -> Result<DirectoryTree> {
        let root_prefix = normalize_prefix(prefix);
        let root_entry = ObjectEntry::directory(&parent_prefix(&root_prefix), root_prefix.clone());
        let mut root = self.open_frame(bucket, root_entry, 0, max_depth).await?;
        let mut stack: Vec<TreeFrame> = Vec::new();
        let mut directories = 1usize;

        loop {
            let (next, depth) = {
                let top = stack.last_mut().unwrap_or(&mut root);
                (top.pending.next(), top.depth + 1)
            };
            match next {
                Some(dir) => {
                    directories += 1;
                    stack.push(self.open_frame(bucket, dir, depth, max_depth).await?);
                }
                None => match stack.pop() {
                    Some(done) => stack
                        .last_mut()
                        .unwrap_or(&mut root)
                        .node
                        .children
                        .push(TreeNode::Directory(done.node)),
                    None => break,
                },
            }
        }

        info!(
            "built tree of {}/{} with {} directories",
            bucket, root_prefix, directories
        );
        Ok(root.node)
    }

    /// List one directory: files become children now, sub-directories are
    /// queued for expansion unless the depth limit is reached.
    async fn open_frame(
        &self,
        bucket: &str,
        entry: ObjectEntry,
        depth: usize,
        max_depth: Option<usize>,
    ) -> Result<TreeFrame> {
        let listing = self.list_exact(bucket, &entry.key, None).await?;
        let mut node = DirectoryTree::new(entry);
        node.children
            .extend(listing.files.into_iter().map(TreeNode::File));

        let expand = max_depth.is_none_or(|max| depth < max);
        let pending = if expand {
            listing.directories
        } else {
            node.children.extend(
                listing
                    .directories
                    .into_iter()
                    .map(|dir| TreeNode::Directory(DirectoryTree::new(dir))),
            );
            Vec::new()
        };

        Ok(TreeFrame {
            node,
            pending: pending.into_iter(),
            depth,
        })
    }
}

/// A directory whose sub-directories are still being expanded.
struct TreeFrame {
    node: DirectoryTree,
    pending: std::vec::IntoIter<ObjectEntry>,
    depth: usize,
}
