//! Size-bounded batch packing.
//!
//! Groups a scanned file list into [`Batch`]es whose serialized size stays
//! under a byte ceiling. In zip mode each batch is one ZIP archive; in direct
//! mode every file is its own batch and the payload is the raw content.
//!
//! [`pack`] only plans: it measures each batch and keeps no payload.
//! [`serialize`] rebuilds one batch's bytes right before it is sent, so at
//! most the batches in flight are held in memory.
//!
//! Files are never split or truncated. A file that cannot fit under the
//! ceiling on its own ends up alone in a batch flagged `over_limit`, and the
//! caller decides what to do with it.

mod archive;
mod digest;
mod pack;
mod types;

pub use digest::plan_digest;
pub use pack::{pack, serialize};
pub use types::{Batch, Compression, PackMode, PackOptions};

/// Errors produced while packing.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "batch {batch_index} serialized to {actual} bytes but was planned at {planned}; \
         the source changed since packing"
    )]
    Drifted {
        batch_index: usize,
        planned: u64,
        actual: u64,
    },

    #[error("batch ceiling must be greater than zero")]
    InvalidCeiling,
}
