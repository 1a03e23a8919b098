//! Recursive file enumeration for batch packing.
//!
//! The scanner walks a [`SourceTree`] depth-first and produces
//! [`FileRecord`]s with paths relative to the root, normalized to forward
//! slashes. A walk is all-or-nothing: the first unreadable entry fails the
//! whole scan so callers never batch a partial listing.

pub mod scan;
pub mod source;
pub mod types;

pub use scan::{Walk, scan};
pub use source::{EntryKind, LocalTree, MemoryTree, SourceEntry, SourceTree};
pub use types::{FileRecord, ScanOptions, SortKey};

/// Errors produced while enumerating a source tree.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot read '{path}': {source}")]
    Access {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Relative path of the entry that could not be read (`""` is the root).
    pub fn path(&self) -> &str {
        match self {
            ScanError::Access { path, .. } => path,
        }
    }
}
