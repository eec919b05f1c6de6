//! Bounded record of handled errors.

use chrono::{DateTime, Utc};
use conductor_core::Severity;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One handled error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Operation that failed.
    pub operation: String,
    /// Error type name.
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Classified severity.
    pub severity: Severity,
    /// Zero-based attempt that failed.
    pub attempt: u32,
    /// Name of the action taken.
    pub action: String,
    /// When the error was handled.
    pub timestamp: DateTime<Utc>,
}

/// FIFO history that drops its oldest records once it grows past
/// `capacity`, keeping the newest `retain`.
#[derive(Debug)]
pub struct ErrorHistory {
    records: VecDeque<ErrorRecord>,
    capacity: usize,
    retain: usize,
}

impl ErrorHistory {
    /// Creates an empty history. `retain` is clamped to `capacity`.
    pub fn new(capacity: usize, retain: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            retain: retain.min(capacity),
        }
    }

    /// Appends a record, trimming if the capacity is exceeded.
    pub fn push(&mut self, record: ErrorRecord) {
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            let excess = self.records.len() - self.retain;
            self.records.drain(..excess);
        }
    }

    /// Returns up to `limit` of the newest records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32) -> ErrorRecord {
        ErrorRecord {
            operation: "op".to_string(),
            kind: "Error".to_string(),
            message: format!("failure {n}"),
            severity: Severity::Medium,
            attempt: n,
            action: "fail".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_trims_to_retain_after_exceeding_capacity() {
        let mut history = ErrorHistory::new(1000, 500);
        for n in 0..1000 {
            history.push(record(n));
        }
        assert_eq!(history.len(), 1000);

        history.push(record(1000));
        assert_eq!(history.len(), 500);
        assert_eq!(history.recent(1)[0].attempt, 1000);
        assert_eq!(history.recent(500)[499].attempt, 501);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut history = ErrorHistory::new(10, 5);
        history.push(record(1));
        history.push(record(2));
        let recent = history.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].attempt, 2);
    }

    #[test]
    fn test_clear() {
        let mut history = ErrorHistory::new(10, 5);
        history.push(record(1));
        history.clear();
        assert!(history.is_empty());
    }
}
