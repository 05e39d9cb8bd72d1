use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One chunk of session output as it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEntry {
    pub at: DateTime<Utc>,
    pub data: String,
}

/// Fixed-capacity history of a session's output, oldest entries evicted first.
///
/// Only used for on-demand log retrieval; never replayed to clients and
/// never used to throttle the process.
#[derive(Debug, Clone)]
pub struct OutputLog {
    entries: VecDeque<OutputEntry>,
    capacity: usize,
    dropped: u64,
}

impl OutputLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(OutputEntry {
            at: Utc::now(),
            data: String::from_utf8_lossy(data).into_owned(),
        });
    }

    /// The newest `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<OutputEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many entries were evicted to stay within capacity.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
