//! ZIP encoding.
//!
//! Each file is compressed once into a standalone single-entry archive. A
//! batch archive is assembled by raw-copying those entries, so re-serializing
//! a batch after backing a file out never recompresses anything.

use std::io::{Cursor, Write};

use batchvault_scanner::FileRecord;
use chrono::{DateTime, Datelike, Timelike, Utc};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::PackError;
use crate::types::Compression;

/// Size of the end-of-central-directory record of an archive without comment.
pub(crate) const EOCD_LEN: u64 = 22;

/// A file compressed into its own single-entry archive.
pub(crate) struct EncodedEntry {
    pub(crate) record: FileRecord,
    blob: Vec<u8>,
}

impl EncodedEntry {
    /// Bytes this entry adds to an archive: local header, data and central
    /// directory record.
    pub(crate) fn cost(&self) -> u64 {
        (self.blob.len() as u64).saturating_sub(EOCD_LEN)
    }
}

/// Compresses `data` into a single-entry archive named after `record.path`.
pub(crate) fn encode_entry(
    record: &FileRecord,
    data: &[u8],
    compression: Compression,
) -> Result<EncodedEntry, PackError> {
    let method = match compression {
        Compression::Stored => CompressionMethod::Stored,
        Compression::Deflated => CompressionMethod::Deflated,
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(zip_time(record.modified_at))
        .large_file(data.len() as u64 >= u32::MAX as u64);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(record.path.as_str(), options)?;
    writer.write_all(data)?;
    let blob = writer.finish()?.into_inner();

    Ok(EncodedEntry {
        record: record.clone(),
        blob,
    })
}

/// Serializes `entries` into one archive, in order.
pub(crate) fn assemble(entries: &[EncodedEntry]) -> Result<Vec<u8>, PackError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in entries {
        let mut single = ZipArchive::new(Cursor::new(entry.blob.as_slice()))?;
        let file = single.by_index_raw(0)?;
        writer.raw_copy_file(file)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Converts a timestamp to ZIP's DOS time, clamping out-of-range values to
/// the format's epoch.
fn zip_time(at: DateTime<Utc>) -> zip::DateTime {
    u16::try_from(at.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                at.month() as u8,
                at.day() as u8,
                at.hour() as u8,
                at.minute() as u8,
                at.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}
