use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{RunState, RunSummary};

/// Mutable state of a single run.
#[derive(Debug)]
pub struct RunContext {
    state: RunState,
    cancel: CancellationToken,
    pub total_batches: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub bytes_uploaded: u64,
    pub resumed_from: Option<usize>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            state: RunState::Idle,
            cancel,
            total_batches: 0,
            uploaded: 0,
            skipped: 0,
            bytes_uploaded: 0,
            resumed_from: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Moves to `next`, returning the previous state.
    pub fn transition(&mut self, next: RunState) -> RunState {
        let prev = self.state;
        if !prev.can_transition_to(next) {
            warn!(from = %prev, to = %next, "unexpected state transition");
        }
        debug!(from = %prev, to = %next, "run state");
        self.state = next;
        prev
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total_batches: self.total_batches,
            uploaded: self.uploaded,
            skipped: self.skipped,
            resumed_from: self.resumed_from,
            bytes_uploaded: self.bytes_uploaded,
        }
    }
}
