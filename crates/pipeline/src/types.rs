use std::fmt;
use std::time::Duration;

use batchvault_packer::PackOptions;
use batchvault_scanner::ScanOptions;
use serde::{Deserialize, Serialize};

/// Default batch ceiling: 100 MiB.
pub const DEFAULT_CEILING: u64 = 100 * 1024 * 1024;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Enumerating,
    Packing,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Enumerating)
                | (Enumerating, Packing)
                | (Enumerating, Failed)
                | (Packing, Uploading)
                | (Packing, Failed)
                | (Uploading, Completed)
                | (Uploading, Failed)
                | (Uploading, Cancelled)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Enumerating => "enumerating",
            RunState::Packing => "packing",
            RunState::Uploading => "uploading",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What to do with a batch holding a single file larger than the ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Fail the run before anything is uploaded.
    #[default]
    Reject,
    /// Leave the batch out and continue with the others.
    Skip,
    /// Upload it anyway.
    Upload,
}

/// Settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scan: ScanOptions,
    pub pack: PackOptions,
    /// Retries after the first attempt of each batch.
    pub max_retries: u32,
    /// Initial delay of the exponential retry backoff.
    pub retry_backoff: Duration,
    /// Maximum batches in flight.
    pub concurrency: usize,
    pub upload_timeout: Duration,
    pub oversize_policy: OversizePolicy,
    /// Leading component of every destination name.
    pub archive_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            pack: PackOptions {
                ceiling: DEFAULT_CEILING,
                mode: Default::default(),
                compression: Default::default(),
            },
            max_retries: 3,
            retry_backoff: Duration::from_millis(1000),
            concurrency: 1,
            upload_timeout: Duration::from_secs(120),
            oversize_policy: OversizePolicy::Reject,
            archive_prefix: "backup".into(),
        }
    }
}

/// Progress event emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StateChanged {
        from: RunState,
        to: RunState,
    },
    BatchStarted {
        index: usize,
        total: usize,
        files: usize,
        size: u64,
        destination: String,
    },
    BatchUploaded {
        index: usize,
        destination: String,
        /// Server-assigned identifier.
        id: String,
    },
    BatchSkipped {
        index: usize,
        reason: String,
    },
    Retrying {
        index: usize,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Failed {
        stage: RunState,
        batch_index: Option<usize>,
        error: String,
    },
    Completed(RunSummary),
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_batches: usize,
    /// Batches uploaded by this run (excludes those done by earlier runs).
    pub uploaded: usize,
    pub skipped: usize,
    /// First batch index of this run when it resumed a previous one.
    pub resumed_from: Option<usize>,
    pub bytes_uploaded: u64,
}
