//! Optimistic status shown while a rebuild is in flight.

use crate::model::IndexStatus;
use crate::path_set::PathSet;

/// The paths the user asked to keep indexed in the latest rebuild.
///
/// While non-empty it decides the displayed status of every path on its own:
/// covered paths are `Pending`, everything else `NotIndexed`.
#[derive(Debug, Clone, Default)]
pub struct PendingOverlay {
    pending: PathSet,
}

impl PendingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = paths.into_iter().collect();
    }

    pub fn is_active(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &PathSet {
        &self.pending
    }

    pub fn covers(&self, path: &str) -> bool {
        self.pending.covers(path)
    }

    pub fn effective_status(&self, path: &str, raw: IndexStatus) -> IndexStatus {
        if !self.is_active() {
            raw
        } else if self.pending.covers(path) {
            IndexStatus::Pending
        } else {
            IndexStatus::NotIndexed
        }
    }

    /// Drop the member covering `path`, returning it.
    pub fn release(&mut self, path: &str) -> Option<String> {
        let member = self.pending.covering(path)?.to_string();
        self.pending.remove(&member);
        Some(member)
    }

    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}
