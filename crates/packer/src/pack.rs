//! Batch packing algorithm.

use std::mem;

use batchvault_scanner::{FileRecord, SourceTree};
use tracing::{debug, info, warn};

use crate::PackError;
use crate::archive::{self, EOCD_LEN, EncodedEntry};
use crate::types::{Batch, PackMode, PackOptions};

/// Plans `records` into ordered batches.
///
/// Every record lands in exactly one batch, in input order. In zip mode a
/// file is added to the open batch while the archive stays under the
/// ceiling; once it would not, the open batch is sealed and the file starts
/// the next one. Sealing serializes the archive and measures it; if the
/// measured size is still over the ceiling the last file is backed out into
/// the next batch and the archive is serialized again. Only the measured
/// size is kept. The result depends only on the input order, the file
/// contents and the options.
///
/// Direct mode reads nothing: a batch's size is the file's scanned size.
pub fn pack(
    records: &[FileRecord],
    source: &dyn SourceTree,
    options: &PackOptions,
) -> Result<Vec<Batch>, PackError> {
    if options.ceiling == 0 {
        return Err(PackError::InvalidCeiling);
    }

    let batches = match options.mode {
        PackMode::Zip => pack_zip(records, source, options)?,
        PackMode::Direct => pack_direct(records, options),
    };

    let over_limit = batches.iter().filter(|b| b.over_limit).count();
    info!(
        files = records.len(),
        batches = batches.len(),
        over_limit,
        ceiling = options.ceiling,
        mode = ?options.mode,
        "packing complete"
    );

    Ok(batches)
}

/// Builds the payload of a planned `batch`.
///
/// Encoding is deterministic, so an unchanged source reproduces the planned
/// size exactly. A mismatch is logged; a batch that no longer fits under the
/// ceiling fails with [`PackError::Drifted`].
pub fn serialize(
    batch: &Batch,
    source: &dyn SourceTree,
    options: &PackOptions,
) -> Result<Vec<u8>, PackError> {
    let payload = match options.mode {
        PackMode::Zip => {
            let entries = batch
                .files
                .iter()
                .map(|record| {
                    let data = read_file(source, record)?;
                    archive::encode_entry(record, &data, options.compression)
                })
                .collect::<Result<Vec<_>, PackError>>()?;
            archive::assemble(&entries)?
        }
        PackMode::Direct => match batch.files.first() {
            Some(record) => read_file(source, record)?,
            None => Vec::new(),
        },
    };

    let actual = payload.len() as u64;
    if actual != batch.size {
        warn!(
            batch = batch.index,
            planned = batch.size,
            actual,
            "batch size differs from plan"
        );
        if actual > options.ceiling && !batch.over_limit {
            return Err(PackError::Drifted {
                batch_index: batch.index,
                planned: batch.size,
                actual,
            });
        }
    }
    debug!(batch = batch.index, size = actual, "serialized batch");
    Ok(payload)
}

fn pack_zip(
    records: &[FileRecord],
    source: &dyn SourceTree,
    options: &PackOptions,
) -> Result<Vec<Batch>, PackError> {
    let mut builder = BatchBuilder::new(options.ceiling);
    for record in records {
        let data = read_file(source, record)?;
        let entry = archive::encode_entry(record, &data, options.compression)?;
        builder.push(entry)?;
    }
    builder.finish()
}

fn pack_direct(records: &[FileRecord], options: &PackOptions) -> Vec<Batch> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let over_limit = record.size > options.ceiling;
            if over_limit {
                warn!(path = %record.path, size = record.size, ceiling = options.ceiling, "file exceeds batch ceiling");
            }
            Batch {
                index,
                files: vec![record.clone()],
                size: record.size,
                over_limit,
            }
        })
        .collect()
}

fn read_file(source: &dyn SourceTree, record: &FileRecord) -> Result<Vec<u8>, PackError> {
    let data = source.read(&record.path).map_err(|e| PackError::Read {
        path: record.path.clone(),
        source: e,
    })?;
    if data.len() as u64 != record.size {
        warn!(
            path = %record.path,
            scanned = record.size,
            actual = data.len(),
            "file size changed since scan"
        );
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// BatchBuilder
// ---------------------------------------------------------------------------

type Assembler = fn(&[EncodedEntry]) -> Result<Vec<u8>, PackError>;

struct BatchBuilder {
    ceiling: u64,
    assemble: Assembler,
    batches: Vec<Batch>,
    open: Vec<EncodedEntry>,
    /// Archive size of `open` as predicted from entry costs.
    open_size: u64,
}

impl BatchBuilder {
    fn new(ceiling: u64) -> Self {
        Self::with_assembler(ceiling, archive::assemble)
    }

    fn with_assembler(ceiling: u64, assemble: Assembler) -> Self {
        Self {
            ceiling,
            assemble,
            batches: Vec::new(),
            open: Vec::new(),
            open_size: EOCD_LEN,
        }
    }

    fn push(&mut self, entry: EncodedEntry) -> Result<(), PackError> {
        while !self.open.is_empty() && self.open_size + entry.cost() > self.ceiling {
            self.seal()?;
        }
        self.open_size += entry.cost();
        self.open.push(entry);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Batch>, PackError> {
        while !self.open.is_empty() {
            self.seal()?;
        }
        Ok(self.batches)
    }

    /// Measures the open entries as one archive and records the batch.
    /// Entries backed out to meet the ceiling become the new open set.
    ///
    /// Entry costs match the assembled size as long as every offset fits in
    /// 32 bits. Past 4 GiB the central directory gains ZIP64 extra fields the
    /// single-entry encodings never carried, so the predicted size runs low
    /// and the measurement here is what keeps the batch under the ceiling.
    fn seal(&mut self) -> Result<(), PackError> {
        let mut entries = mem::take(&mut self.open);
        let mut spill = Vec::new();

        let size = loop {
            let size = (self.assemble)(&entries)?.len() as u64;
            if size <= self.ceiling || entries.len() <= 1 {
                break size;
            }
            if let Some(last) = entries.pop() {
                debug!(
                    path = %last.record.path,
                    size,
                    ceiling = self.ceiling,
                    "archive over ceiling, backing out last file"
                );
                spill.push(last);
            }
        };

        let over_limit = size > self.ceiling;
        let index = self.batches.len();
        if over_limit {
            warn!(
                batch = index,
                path = %entries[0].record.path,
                size,
                ceiling = self.ceiling,
                "file exceeds batch ceiling on its own"
            );
        }
        debug!(batch = index, files = entries.len(), size, "sealed batch");

        self.batches.push(Batch {
            index,
            files: entries.into_iter().map(|e| e.record).collect(),
            size,
            over_limit,
        });

        spill.reverse();
        self.open_size = EOCD_LEN + spill.iter().map(EncodedEntry::cost).sum::<u64>();
        self.open = spill;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Compression;
    use batchvault_scanner::{MemoryTree, ScanOptions, scan};
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    /// Deterministic incompressible bytes.
    fn noise(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    fn tree_of(sizes: &[usize]) -> (MemoryTree, Vec<FileRecord>) {
        let mut tree = MemoryTree::new("mem");
        for (i, &size) in sizes.iter().enumerate() {
            tree.insert(&format!("file-{i:03}.bin"), noise(i as u64, size));
        }
        let records = scan(&tree, &ScanOptions::default()).unwrap();
        (tree, records)
    }

    fn zip_options(ceiling: u64) -> PackOptions {
        PackOptions {
            ceiling,
            mode: PackMode::Zip,
            compression: Compression::Stored,
        }
    }

    fn archive_names(payload: &[u8]) -> Vec<String> {
        let mut zip = ZipArchive::new(Cursor::new(payload)).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn batches_partition_input_in_order() {
        let sizes = [300, 1200, 50, 800, 800, 10, 2000, 5, 640, 900];
        let (tree, records) = tree_of(&sizes);
        let batches = pack(&records, &tree, &zip_options(2500)).unwrap();

        let flattened: Vec<&FileRecord> = batches.iter().flat_map(|b| &b.files).collect();
        assert_eq!(flattened.len(), records.len());
        for (a, b) in flattened.iter().zip(records.iter()) {
            assert_eq!(*a, b);
        }

        for (i, batch) in batches.iter().enumerate() {
            assert_eq!(batch.index, i);
            let payload = serialize(batch, &tree, &zip_options(2500)).unwrap();
            assert_eq!(batch.size, payload.len() as u64);
            assert!(batch.size <= 2500, "batch {i} is {} bytes", batch.size);
            assert!(!batch.over_limit);
        }
    }

    #[test]
    fn archives_contain_exact_file_contents() {
        let sizes = [100, 200, 300, 400];
        let (tree, records) = tree_of(&sizes);
        let batches = pack(&records, &tree, &zip_options(700)).unwrap();
        assert!(batches.len() > 1);

        for batch in &batches {
            let payload = serialize(batch, &tree, &zip_options(700)).unwrap();
            let names = archive_names(&payload);
            let expected: Vec<&str> = batch.files.iter().map(|f| f.path.as_str()).collect();
            assert_eq!(names, expected);

            let mut zip = ZipArchive::new(Cursor::new(&payload[..])).unwrap();
            for file in &batch.files {
                let mut data = Vec::new();
                zip.by_name(&file.path)
                    .unwrap()
                    .read_to_end(&mut data)
                    .unwrap();
                assert_eq!(data, tree.read(&file.path).unwrap());
            }
        }
    }

    #[test]
    fn hundred_per_batch_scenario() {
        // 250 equal files with a ceiling that fits exactly 100 entries.
        let sizes = vec![4096; 250];
        let (tree, records) = tree_of(&sizes);

        let sample = archive::encode_entry(
            &records[0],
            &tree.read(&records[0].path).unwrap(),
            Compression::Stored,
        )
        .unwrap();
        let cost = sample.cost();
        let ceiling = EOCD_LEN + 100 * cost + cost * 3 / 4;

        let batches = pack(&records, &tree, &zip_options(ceiling)).unwrap();
        let counts: Vec<usize> = batches.iter().map(|b| b.files.len()).collect();
        assert_eq!(counts, vec![100, 100, 50]);
        assert!(batches.iter().all(|b| b.size <= ceiling));
    }

    #[test]
    fn oversized_file_is_isolated_and_flagged() {
        let sizes = [100, 2048, 100];
        let (tree, records) = tree_of(&sizes);
        let batches = pack(&records, &tree, &zip_options(1024)).unwrap();

        assert_eq!(batches.len(), 3);
        assert!(!batches[0].over_limit);
        assert!(batches[1].over_limit);
        assert_eq!(batches[1].files.len(), 1);
        assert_eq!(batches[1].files[0].path, "file-001.bin");
        assert!(batches[1].size > 1024);
        assert!(!batches[2].over_limit);

        // Content is intact, not truncated.
        let payload = serialize(&batches[1], &tree, &zip_options(1024)).unwrap();
        assert_eq!(payload.len() as u64, batches[1].size);
        let mut zip = ZipArchive::new(Cursor::new(&payload[..])).unwrap();
        assert_eq!(zip.by_index(0).unwrap().size(), 2048);
    }

    #[test]
    fn packing_is_deterministic() {
        let sizes = [700, 300, 900, 100, 1500, 20];
        let (tree, records) = tree_of(&sizes);
        let options = PackOptions {
            ceiling: 2000,
            mode: PackMode::Zip,
            compression: Compression::Deflated,
        };

        let a = pack(&records, &tree, &options).unwrap();
        let b = pack(&records, &tree, &options).unwrap();
        assert_eq!(a, b);
        assert_eq!(crate::plan_digest(&a), crate::plan_digest(&b));
        for batch in &a {
            let first = serialize(batch, &tree, &options).unwrap();
            let second = serialize(batch, &tree, &options).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.len() as u64, batch.size);
        }
    }

    #[test]
    fn compression_lets_more_files_fit() {
        let mut tree = MemoryTree::new("mem");
        for i in 0..10 {
            tree.insert(&format!("log-{i}.txt"), "all work and no play ".repeat(50));
        }
        let records = scan(&tree, &ScanOptions::default()).unwrap();

        let stored = pack(&records, &tree, &zip_options(4096)).unwrap();
        let deflated = pack(
            &records,
            &tree,
            &PackOptions {
                ceiling: 4096,
                mode: PackMode::Zip,
                compression: Compression::Deflated,
            },
        )
        .unwrap();
        assert!(deflated.len() < stored.len());
        assert_eq!(deflated.len(), 1);
    }

    #[test]
    fn direct_mode_one_file_per_batch() {
        let sizes = [10, 5000, 20];
        let (tree, records) = tree_of(&sizes);
        let options = PackOptions {
            ceiling: 1000,
            mode: PackMode::Direct,
            compression: Compression::Deflated,
        };
        let batches = pack(&records, &tree, &options).unwrap();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            serialize(&batches[0], &tree, &options).unwrap(),
            tree.read("file-000.bin").unwrap()
        );
        assert!(!batches[0].over_limit);
        assert!(batches[1].over_limit);
        assert_eq!(batches[1].size, 5000);
        assert_eq!(batches[2].index, 2);
    }

    #[test]
    fn zero_ceiling_rejected() {
        let (tree, records) = tree_of(&[1]);
        let err = pack(&records, &tree, &zip_options(0)).unwrap_err();
        assert!(matches!(err, PackError::InvalidCeiling));
    }

    #[test]
    fn unreadable_file_fails_packing() {
        let (mut tree, records) = tree_of(&[10, 10]);
        tree.deny("file-001.bin");
        let err = pack(&records, &tree, &zip_options(1 << 20)).unwrap_err();
        match err {
            PackError::Read { path, .. } => assert_eq!(path, "file-001.bin"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let tree = MemoryTree::new("mem");
        let batches = pack(&[], &tree, &zip_options(100)).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn direct_planning_reads_nothing() {
        let (mut tree, records) = tree_of(&[10, 20]);
        tree.deny("file-001.bin");
        let options = PackOptions {
            ceiling: 100,
            mode: PackMode::Direct,
            compression: Compression::Stored,
        };

        let batches = pack(&records, &tree, &options).unwrap();
        assert_eq!(batches[1].size, 20);
        let err = serialize(&batches[1], &tree, &options).unwrap_err();
        assert!(matches!(err, PackError::Read { ref path, .. } if path == "file-001.bin"));
    }

    #[test]
    fn serialize_fails_when_a_file_outgrew_the_plan() {
        let (mut tree, records) = tree_of(&[100, 100, 100]);
        let options = zip_options(400);
        let batches = pack(&records, &tree, &options).unwrap();
        assert!(!batches[0].over_limit);

        tree.insert(&batches[0].files[0].path, noise(99, 1000));
        let err = serialize(&batches[0], &tree, &options).unwrap_err();
        match err {
            PackError::Drifted {
                batch_index,
                planned,
                actual,
            } => {
                assert_eq!(batch_index, 0);
                assert_eq!(planned, batches[0].size);
                assert!(actual > 400);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn serialize_accepts_a_file_that_shrank() {
        let (mut tree, records) = tree_of(&[100, 100]);
        let options = zip_options(1 << 20);
        let batches = pack(&records, &tree, &options).unwrap();

        tree.insert("file-000.bin", noise(0, 10));
        let payload = serialize(&batches[0], &tree, &options).unwrap();
        assert!((payload.len() as u64) < batches[0].size);
    }

    /// Real assembly plus a fixed overhead per entry, so archives come out
    /// larger than the entry costs predict.
    fn padded_assemble(entries: &[EncodedEntry]) -> Result<Vec<u8>, PackError> {
        let mut bytes = archive::assemble(entries)?;
        bytes.resize(bytes.len() + 40 * entries.len(), 0);
        Ok(bytes)
    }

    #[test]
    fn backs_out_files_when_the_archive_outgrows_its_estimate() {
        let (tree, records) = tree_of(&[200; 6]);
        let entries: Vec<EncodedEntry> = records
            .iter()
            .map(|r| {
                archive::encode_entry(r, &tree.read(&r.path).unwrap(), Compression::Stored)
                    .unwrap()
            })
            .collect();
        let cost = entries[0].cost();
        // Three entries fit by estimate, only two once padded.
        let ceiling = EOCD_LEN + 3 * cost + 10;

        let mut builder = BatchBuilder::with_assembler(ceiling, padded_assemble);
        for entry in entries {
            builder.push(entry).unwrap();
        }
        let batches = builder.finish().unwrap();

        assert_eq!(batches[0].files.len(), 2);
        assert!(batches.iter().all(|b| b.size <= ceiling && !b.over_limit));
        let flattened: Vec<&FileRecord> = batches.iter().flat_map(|b| &b.files).collect();
        assert_eq!(flattened, records.iter().collect::<Vec<_>>());
        for (i, batch) in batches.iter().enumerate() {
            assert_eq!(batch.index, i);
        }
    }
}
