use batchvault_scanner::FileRecord;
use serde::{Deserialize, Serialize};

/// How files are turned into upload payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackMode {
    /// Group files into ZIP archives bounded by the ceiling.
    #[default]
    Zip,
    /// One file per batch, sent as-is.
    Direct,
}

/// ZIP entry compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

/// Packing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackOptions {
    /// Maximum serialized size of one batch, in bytes.
    pub ceiling: u64,
    #[serde(default)]
    pub mode: PackMode,
    #[serde(default)]
    pub compression: Compression,
}

/// A planned group of files for a single upload.
///
/// The plan carries no payload; [`serialize`](crate::serialize) produces the
/// bytes when the batch is about to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position in the batch sequence (0-based).
    pub index: usize,
    /// Files in this batch, in input order.
    pub files: Vec<FileRecord>,
    /// Serialized size in bytes, measured while planning.
    pub size: u64,
    /// Set when a single file could not fit under the ceiling.
    pub over_limit: bool,
}
