//! Content-keyed uploads and simulated directory trees over flat,
//! bucket-style object stores.
//!
//! Objects are named by a block-wise SHA-1 content key
//! ([`services::etag`]), so identical bytes always land on the same key.
//! Directories are key prefixes ending in `/`: [`DirectoryWalker`] lists and
//! assembles them, [`BatchDeleter`] removes keys in bounded batches and
//! [`TreeDeleter`] removes a whole prefix children-first.
//!
//! Store access goes through the [`ObjectStoreClient`] trait.
//! [`LocalObjectStore`] implements it on local disk with SQLite metadata.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use config::AppConfig;
pub use errors::{ConsistencyError, Error, Result, StoreError, StoreResult};
pub use models::entry::{DirectoryTree, EntryKind, Listing, ObjectEntry, TreeNode};
pub use services::{
    batch_delete::BatchDeleter,
    client::ObjectStoreClient,
    etag::ContentKey,
    registry::{ClientRegistry, ConfigResolver, MemoryTtlCache, TtlCache},
    storage_service::LocalObjectStore,
    tree_delete::{TreeDeleteReport, TreeDeleter},
    upload_service::UploadService,
    walker::DirectoryWalker,
};
