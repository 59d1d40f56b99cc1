//! Error types shared by the digest, listing and deletion paths.
//!
//! `StoreError` is what an [`ObjectStoreClient`](crate::services::client::ObjectStoreClient)
//! reports; `Error` is what the crate's own operations surface to callers.

use std::io;
use thiserror::Error;

/// Failures reported by an object store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("listing `{prefix}` stalled: truncated page without a new continuation marker")]
    StalledListing { prefix: String },
    #[error("store service error {code}: {message}")]
    Service { code: String, message: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A multi-call operation finished some of its store calls but not all of them.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("batch delete in `{bucket}` incomplete: requested {requested}, deleted {deleted}")]
    IncompleteDelete {
        bucket: String,
        requested: usize,
        deleted: usize,
        /// Keys the store explicitly reported as not deleted.
        failed: Vec<String>,
    },
    #[error("copied `{from}` to `{to}` but could not remove the source; object exists at both")]
    PartialRename {
        from: String,
        to: String,
        #[source]
        source: Box<Error>,
    },
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// The local byte source could not be opened, sized, or fully read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Reading failed part-way through hashing.
    #[error("digest failed at byte offset {offset}: {source}")]
    Digest {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bucket configuration not found: {0}")]
    ConfigNotFound(String),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("refusing to upload empty content: {0}")]
    EmptyUpload(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Decode(err.to_string())
    }
}
