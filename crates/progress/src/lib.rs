//! Durable resume cursor for upload runs.
//!
//! A [`ProgressStore`] keeps a single [`ProgressRecord`] in a [`KvStore`].
//! Saves go through a write transaction so a crash mid-write leaves the
//! previous record readable.

pub mod kv;
pub mod store;

pub use kv::{FileKvStore, KvStore, MemoryKvStore, WriteTxn};
pub use store::{ProgressRecord, ProgressStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt progress record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}
