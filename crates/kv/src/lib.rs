//! The replicated key-value service.
//!
//! This crate supplies the application side of the replication engine: an
//! in-memory namespaced key-value store ([`MemStorage`]), the CRUD
//! execution layer mapping storage results to client error tokens, and
//! [`KvService`], the [`quorumkv_pbft::Service`] implementation that
//! executes ordered operations strictly sequentially and serves the
//! checkpoint protocol with state hashes and snapshots.

mod service;
mod storage;

pub use service::KvService;
pub use storage::{MemStorage, StorageResult, MAX_KEY_SIZE, MAX_VALUE_SIZE};
