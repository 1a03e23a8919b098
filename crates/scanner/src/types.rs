use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file discovered during a scan. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the scan root, `/`-separated.
    pub path: String,
    /// Size in bytes at enumeration time.
    pub size: u64,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
}

impl FileRecord {
    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lower-cased extension without the leading dot, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(i) => Some(name[i + 1..].to_ascii_lowercase()),
        }
    }
}

/// Ordering applied to a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Path,
    Modified,
    Size,
}

/// Options controlling what a scan returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Extension allow-list. Empty accepts every file. Matching ignores case
    /// and an optional leading dot (`"JPG"`, `".jpg"` and `"jpg"` are equal).
    #[serde(default)]
    pub extensions: Vec<String>,
    /// When set, the full list is materialized and stably sorted.
    #[serde(default)]
    pub sort: Option<SortKey>,
}

impl ScanOptions {
    /// Returns `true` if `record` passes the extension filter.
    pub fn accepts(&self, record: &FileRecord) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let Some(ext) = record.extension() else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}
