//! Source tree capability.
//!
//! The scanner and packer only see a [`SourceTree`]: list a directory, read
//! a file. [`LocalTree`] maps it onto the local filesystem; [`MemoryTree`]
//! keeps everything in memory for tests and synthetic sources.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Kind of a directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File {
        size: u64,
        modified_at: DateTime<Utc>,
    },
    Dir,
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Entry name (single path component).
    pub name: String,
    pub kind: EntryKind,
}

/// Read-only access to a directory tree.
///
/// Paths are relative to the tree root and `/`-separated; `""` is the root.
pub trait SourceTree: Send + Sync {
    /// Human-readable name of the root (used in logs).
    fn root_name(&self) -> String;

    /// Lists the direct children of `dir`.
    fn list(&self, dir: &str) -> io::Result<Vec<SourceEntry>>;

    /// Reads the full content of the file at `path`.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// LocalTree
// ---------------------------------------------------------------------------

/// A [`SourceTree`] rooted at a local directory.
///
/// Children are listed in byte order of their names so that traversal order
/// does not depend on the filesystem. Symlinks and special files are skipped.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root: PathBuf,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }
}

impl SourceTree for LocalTree {
    fn root_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    fn list(&self, dir: &str) -> io::Result<Vec<SourceEntry>> {
        let mut result = Vec::new();

        for entry in std::fs::read_dir(self.resolve(dir))? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            // Relative paths are UTF-8 strings, so such a name could never be
            // read back.
            let name = entry.file_name().into_string().map_err(|raw| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "file name {:?} is not valid UTF-8; rename it to back up this folder",
                        raw.to_string_lossy()
                    ),
                )
            })?;

            if metadata.is_dir() {
                result.push(SourceEntry {
                    name,
                    kind: EntryKind::Dir,
                });
            } else if metadata.is_file() {
                let modified_at = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                result.push(SourceEntry {
                    name,
                    kind: EntryKind::File {
                        size: metadata.len(),
                        modified_at,
                    },
                });
            } else {
                debug!(dir, name = %name, "skipping non-regular entry");
            }
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }
}

// ---------------------------------------------------------------------------
// MemoryTree
// ---------------------------------------------------------------------------

/// An in-memory [`SourceTree`].
///
/// Directories are implied by the file paths. Paths added with
/// [`deny`](Self::deny) fail with `PermissionDenied` on list and read.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    name: String,
    files: BTreeMap<String, (Vec<u8>, DateTime<Utc>)>,
    denied: BTreeSet<String>,
}

impl MemoryTree {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Adds a file with a fixed epoch timestamp.
    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) {
        self.insert_with_time(path, data, DateTime::<Utc>::UNIX_EPOCH);
    }

    /// Adds a file with the given modification time.
    pub fn insert_with_time(
        &mut self,
        path: &str,
        data: impl Into<Vec<u8>>,
        modified_at: DateTime<Utc>,
    ) {
        let path = path.trim_matches('/').to_string();
        self.files.insert(path, (data.into(), modified_at));
    }

    /// Makes `path` (file or directory) unreadable.
    pub fn deny(&mut self, path: &str) {
        self.denied.insert(path.trim_matches('/').to_string());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn check_access(&self, path: &str) -> io::Result<()> {
        if self.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("access to '{path}' denied"),
            ));
        }
        Ok(())
    }
}

impl SourceTree for MemoryTree {
    fn root_name(&self) -> String {
        self.name.clone()
    }

    fn list(&self, dir: &str) -> io::Result<Vec<SourceEntry>> {
        let dir = dir.trim_matches('/');
        self.check_access(dir)?;

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut result: Vec<SourceEntry> = Vec::new();
        let mut found_any = dir.is_empty();
        for (path, (data, modified_at)) in self.files.range(prefix.clone()..) {
            let Some(rest) = path.strip_prefix(&prefix) else {
                break;
            };
            found_any = true;
            match rest.split_once('/') {
                Some((child, _)) => result.push(SourceEntry {
                    name: child.to_string(),
                    kind: EntryKind::Dir,
                }),
                None => result.push(SourceEntry {
                    name: rest.to_string(),
                    kind: EntryKind::File {
                        size: data.len() as u64,
                        modified_at: *modified_at,
                    },
                }),
            }
        }

        if !found_any {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory '{dir}'"),
            ));
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        result.dedup_by(|a, b| a.name == b.name && a.kind == b.kind);
        Ok(result)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let path = path.trim_matches('/');
        self.check_access(path)?;
        self.files
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such file '{path}'")))
    }
}
