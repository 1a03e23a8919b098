//! Run error types.

use batchvault_packer::PackError;
use batchvault_progress::StoreError;
use batchvault_scanner::ScanError;
use batchvault_sink::UploadError;

use crate::types::RunState;

/// Errors that end a run.
///
/// Variants that can occur in more than one stage record the stage they
/// were raised in.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("enumeration failed: {0}")]
    Access(#[from] ScanError),

    #[error("no files to upload in '{root}'")]
    EmptySource { root: String },

    #[error("packing failed: {0}")]
    Packing(#[from] PackError),

    #[error("batch {batch_index} ('{path}', {size} bytes) exceeds the {ceiling}-byte ceiling")]
    OverLimit {
        batch_index: usize,
        path: String,
        size: u64,
        ceiling: u64,
    },

    #[error("cannot build batch {batch_index}: {source}")]
    Payload {
        batch_index: usize,
        #[source]
        source: PackError,
    },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("progress store error: {source}")]
    Store {
        stage: RunState,
        #[source]
        source: StoreError,
    },

    #[error("background task failed: {message}")]
    Task { stage: RunState, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl RunError {
    pub(crate) fn store(stage: RunState) -> impl FnOnce(StoreError) -> RunError {
        move |source| RunError::Store { stage, source }
    }

    pub(crate) fn task(stage: RunState) -> impl FnOnce(tokio::task::JoinError) -> RunError {
        move |e| RunError::Task {
            stage,
            message: e.to_string(),
        }
    }

    /// Stage the error belongs to.
    pub fn stage(&self) -> RunState {
        match self {
            RunError::Access(_) | RunError::EmptySource { .. } => RunState::Enumerating,
            RunError::Packing(_) | RunError::OverLimit { .. } => RunState::Packing,
            RunError::Payload { .. } | RunError::Upload(_) | RunError::Cancelled => {
                RunState::Uploading
            }
            RunError::Store { stage, .. } | RunError::Task { stage, .. } => *stage,
        }
    }

    /// Batch the error refers to, if any.
    pub fn batch_index(&self) -> Option<usize> {
        match self {
            RunError::OverLimit { batch_index, .. } | RunError::Payload { batch_index, .. } => {
                Some(*batch_index)
            }
            RunError::Upload(e) => Some(e.batch_index),
            _ => None,
        }
    }
}
