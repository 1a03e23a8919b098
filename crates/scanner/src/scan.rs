//! Depth-first walk over a [`SourceTree`].

use tracing::{debug, info};

use crate::ScanError;
use crate::source::{EntryKind, SourceEntry, SourceTree};
use crate::types::{FileRecord, ScanOptions, SortKey};

/// Scans `tree` and returns every accepted file.
///
/// The walk is atomic from the caller's point of view: any unreadable
/// directory fails the scan and no partial list is returned. When
/// `options.sort` is set the list is stably sorted after the walk.
pub fn scan(tree: &dyn SourceTree, options: &ScanOptions) -> Result<Vec<FileRecord>, ScanError> {
    let mut files = Walk::new(tree, options).collect::<Result<Vec<_>, _>>()?;

    match options.sort {
        Some(SortKey::Path) => files.sort_by(|a, b| a.path.cmp(&b.path)),
        Some(SortKey::Modified) => files.sort_by_key(|f| f.modified_at),
        Some(SortKey::Size) => files.sort_by_key(|f| f.size),
        None => {}
    }

    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    info!(
        root = %tree.root_name(),
        files = files.len(),
        total_bytes,
        "scan complete"
    );

    Ok(files)
}

/// Lazy depth-first iterator of [`FileRecord`]s.
///
/// Directory children are visited in the order the tree lists them, and a
/// subdirectory is descended into as soon as it is reached. After the first
/// error the iterator is exhausted.
pub struct Walk<'a> {
    tree: &'a dyn SourceTree,
    options: &'a ScanOptions,
    stack: Vec<(String, std::vec::IntoIter<SourceEntry>)>,
    started: bool,
    failed: bool,
}

impl<'a> Walk<'a> {
    pub fn new(tree: &'a dyn SourceTree, options: &'a ScanOptions) -> Self {
        Self {
            tree,
            options,
            stack: Vec::new(),
            started: false,
            failed: false,
        }
    }

    fn descend(&mut self, dir: String) -> Result<(), ScanError> {
        let entries = self.tree.list(&dir).map_err(|source| ScanError::Access {
            path: dir.clone(),
            source,
        })?;
        debug!(dir = %dir, entries = entries.len(), "listed directory");
        self.stack.push((dir, entries.into_iter()));
        Ok(())
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<FileRecord, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.started {
            self.started = true;
            if let Err(e) = self.descend(String::new()) {
                self.failed = true;
                return Some(Err(e));
            }
        }

        loop {
            let next = match self.stack.last_mut() {
                None => return None,
                Some((dir, entries)) => entries.next().map(|e| (join(dir, &e.name), e.kind)),
            };

            let Some((path, kind)) = next else {
                self.stack.pop();
                continue;
            };

            match kind {
                EntryKind::Dir => {
                    if let Err(e) = self.descend(path) {
                        self.failed = true;
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
                EntryKind::File { size, modified_at } => {
                    let record = FileRecord {
                        path,
                        size,
                        modified_at,
                    };
                    if self.options.accepts(&record) {
                        return Some(Ok(record));
                    }
                }
            }
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
