//! File and directory entries produced by the directory walker.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::wire::ObjectSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed prefix.
///
/// `key` is the full key; `name` is `key` with `prefix` stripped. Directory
/// entries never carry size, modification time or etag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub prefix: String,
    pub name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl ObjectEntry {
    pub fn file(prefix: &str, summary: ObjectSummary) -> Self {
        Self {
            kind: EntryKind::File,
            prefix: prefix.to_string(),
            name: strip_prefix(&summary.key, prefix),
            key: summary.key,
            size: Some(summary.size),
            last_modified: summary.last_modified,
            etag: summary.etag,
        }
    }

    pub fn directory(prefix: &str, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            kind: EntryKind::Directory,
            prefix: prefix.to_string(),
            name: strip_prefix(&key, prefix),
            key,
            size: None,
            last_modified: None,
            etag: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

fn strip_prefix(key: &str, prefix: &str) -> String {
    key.strip_prefix(prefix).unwrap_or(key).to_string()
}

/// A fully drained listing of one directory level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<ObjectEntry>,
    pub directories: Vec<ObjectEntry>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TreeNode {
    File(ObjectEntry),
    Directory(DirectoryTree),
}

/// A directory and its children: files first, then sub-directories, each
/// sub-directory expanded in turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectoryTree {
    #[serde(flatten)]
    pub entry: ObjectEntry,
    pub children: Vec<TreeNode>,
}

impl DirectoryTree {
    pub fn new(entry: ObjectEntry) -> Self {
        Self {
            entry,
            children: Vec::new(),
        }
    }

    /// Every file key below this directory, in tree order.
    pub fn file_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        let mut stack: Vec<std::slice::Iter<'_, TreeNode>> = vec![self.children.iter()];
        while let Some(level) = stack.last_mut() {
            match level.next() {
                Some(TreeNode::File(entry)) => keys.push(entry.key.as_str()),
                Some(TreeNode::Directory(dir)) => stack.push(dir.children.iter()),
                None => {
                    stack.pop();
                }
            }
        }
        keys
    }

    /// Sub-directories directly below this one.
    pub fn subdirectories(&self) -> impl Iterator<Item = &DirectoryTree> {
        self.children.iter().filter_map(|node| match node {
            TreeNode::Directory(dir) => Some(dir),
            TreeNode::File(_) => None,
        })
    }
}
