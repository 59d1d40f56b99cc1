//! Data types exchanged between the store backends and the tree engine.
//!
//! - `wire`: request/response shapes of the object store interface
//! - `entry`: file/directory entries and assembled directory trees
//! - `bucket` / `object`: rows persisted by the local SQLite-backed store

pub mod bucket;
pub mod entry;
pub mod object;
pub mod wire;
