//! In-memory history of saved check-up results.
//!
//! Most recent first, bounded. Lives for the process lifetime only.

use crate::core::report::CheckUpResult;
use std::collections::VecDeque;

/// Default number of results kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Saved results, newest first. The oldest entry is evicted when full.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<CheckUpResult>,
    capacity: usize,
}

impl History {
    /// Create a history holding at most `capacity` results (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Prepend a result. Returns the evicted result, if any.
    pub fn push(&mut self, result: CheckUpResult) -> Option<CheckUpResult> {
        self.entries.push_front(result);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &CheckUpResult> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&CheckUpResult> {
        self.entries.front()
    }

    /// Copy of the entries, newest first.
    pub fn to_vec(&self) -> Vec<CheckUpResult> {
        self.entries.iter().cloned().collect()
    }

    /// Pretty JSON report of the entries, newest first.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_vec())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
