//! The resume cursor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::StoreError;
use crate::kv::KvStore;

/// Last contiguous upload position of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Highest index such that every batch `0..=index` is uploaded.
    pub completed_batch_index: usize,
    pub total_batches: usize,
    pub updated_at: DateTime<Utc>,
    /// Digest of the batch plan this cursor refers to.
    pub plan_digest: String,
    /// Label shared by every destination name of the run.
    pub run_label: String,
}

impl ProgressRecord {
    /// Index the next run should start from.
    pub fn next_index(&self) -> usize {
        self.completed_batch_index + 1
    }
}

/// Single-record progress store over a [`KvStore`].
#[derive(Clone)]
pub struct ProgressStore {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl ProgressStore {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Store key for runs over `root`, so distinct roots never share a cursor.
    pub fn key_for_root(root: &str) -> String {
        let digest = Sha256::digest(root.as_bytes());
        format!("progress-{}", &hex::encode(digest)[..16])
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Result<Option<ProgressRecord>, StoreError> {
        match self.kv.get(&self.key)? {
            Some(bytes) => {
                let record: ProgressRecord = serde_json::from_slice(&bytes)?;
                debug!(
                    key = %self.key,
                    completed = record.completed_batch_index,
                    total = record.total_batches,
                    "loaded progress"
                );
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        self.kv.put(&self.key, &json)?;
        debug!(
            key = %self.key,
            completed = record.completed_batch_index,
            "saved progress"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.kv.delete(&self.key)?;
        debug!(key = %self.key, "cleared progress");
        Ok(())
    }
}
