use std::collections::BTreeSet;

/// Tracks the contiguous prefix of finished batches when they complete out
/// of order.
#[derive(Debug, Clone)]
pub struct ContiguousCursor {
    /// First index not yet finished.
    next: usize,
    /// Finished indexes above `next`.
    ahead: BTreeSet<usize>,
}

impl ContiguousCursor {
    /// Cursor for a run whose batches `0..start` are already finished.
    pub fn new(start: usize) -> Self {
        Self {
            next: start,
            ahead: BTreeSet::new(),
        }
    }

    /// Marks `index` finished. Returns the new highest contiguous index when
    /// the prefix grew.
    pub fn mark(&mut self, index: usize) -> Option<usize> {
        if index < self.next {
            return None;
        }
        self.ahead.insert(index);
        let before = self.next;
        while self.ahead.remove(&self.next) {
            self.next += 1;
        }
        (self.next > before).then(|| self.next - 1)
    }

    /// Highest index with every index at or below it finished.
    pub fn completed(&self) -> Option<usize> {
        self.next.checked_sub(1)
    }

    /// Number of finished indexes past a gap.
    pub fn pending(&self) -> usize {
        self.ahead.len()
    }
}
