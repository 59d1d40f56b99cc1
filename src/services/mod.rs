//! Operations over object stores.
//!
//! - `etag` / `codec`: content keys derived from file bytes
//! - `client`: the store interface, `storage_service`: its local implementation
//! - `walker`, `batch_delete`, `tree_delete`: simulated directories over flat keys
//! - `registry`, `config_repository`: bucket configuration and per-bucket clients
//! - `upload_service`: the caller-facing facade

pub mod batch_delete;
pub mod client;
pub mod codec;
pub mod config_repository;
pub mod etag;
pub mod registry;
pub mod storage_service;
pub mod tree_delete;
pub mod upload_service;
pub mod walker;
