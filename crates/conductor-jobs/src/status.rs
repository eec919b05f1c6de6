//! Job search and queue statistics.

use crate::job::{Job, JobStatus, Priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Job search query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSearchQuery {
    /// Filter by status.
    pub status: Option<JobStatus>,

    /// Filter by job type.
    pub job_type: Option<String>,

    /// Filter by name (substring).
    pub name: Option<String>,

    /// Filter by tag.
    pub tag: Option<String>,

    /// Offset for pagination.
    #[serde(default)]
    pub offset: usize,

    /// Limit for pagination (0 = default of 100).
    #[serde(default)]
    pub limit: usize,
}

impl JobSearchQuery {
    /// Create a new search query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by status.
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by job type.
    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    /// Filter by name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Filter by tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set pagination.
    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Effective page size.
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            100
        } else {
            self.limit
        }
    }

    /// Returns true if the job passes every filter.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(ref job_type) = self.job_type {
            if &job.job_type != job_type {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if !job.name.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !job.tags.contains(tag) {
                return false;
            }
        }
        true
    }
}

/// Job search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSearchResult {
    /// Matching jobs on this page, oldest first.
    pub jobs: Vec<Job>,

    /// Total matching jobs.
    pub total: usize,

    /// Offset used.
    pub offset: usize,

    /// Limit used.
    pub limit: usize,
}

impl JobSearchResult {
    /// Returns true if more results are available.
    pub fn has_more(&self) -> bool {
        self.offset + self.jobs.len() < self.total
    }
}

/// Pending jobs per priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    /// High priority.
    pub high: usize,
    /// Medium priority.
    pub medium: usize,
    /// Low priority.
    pub low: usize,
}

impl PriorityCounts {
    pub(crate) fn add(&mut self, priority: Priority) {
        match priority {
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}

/// Counters that only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeCounters {
    /// Accepted submissions.
    pub submitted: u64,
    /// Rejected submissions.
    pub rejected: u64,
    /// Completed jobs (including fallbacks).
    pub completed: u64,
    /// Failed jobs.
    pub failed: u64,
    /// Timed out jobs.
    pub timed_out: u64,
    /// Cancelled jobs.
    pub cancelled: u64,
    /// Retry resubmissions.
    pub retried: u64,
    /// Jobs completed with a fallback value.
    pub fallbacks: u64,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs currently stored.
    pub total: usize,

    /// Jobs per status.
    pub by_status: HashMap<JobStatus, usize>,

    /// Pending jobs per priority class (ready and delayed).
    pub pending_by_priority: PriorityCounts,

    /// Pending jobs not yet ready.
    pub delayed: usize,

    /// Lifetime counters.
    pub lifetime: LifetimeCounters,

    /// Mean time from readiness to start, in milliseconds.
    pub avg_wait_ms: f64,

    /// Mean execution time, in milliseconds.
    pub avg_execution_ms: f64,

    /// Configured capacity (0 = unbounded).
    pub max_queue_size: usize,

    /// False once the queue is closed.
    pub accepting: bool,
}

impl QueueStats {
    /// Jobs with the given status.
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Pending jobs.
    pub fn pending(&self) -> usize {
        self.count(JobStatus::Pending)
    }

    /// Running jobs.
    pub fn running(&self) -> usize {
        self.count(JobStatus::Running)
    }

    /// Fraction of capacity in use; zero when unbounded.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.max_queue_size == 0 {
            0.0
        } else {
            self.pending() as f64 / self.max_queue_size as f64
        }
    }

    /// Failed plus timed out over all finished jobs.
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let failures = self.lifetime.failed + self.lifetime.timed_out;
        let finished = failures + self.lifetime.completed;
        if finished == 0 {
            0.0
        } else {
            failures as f64 / finished as f64
        }
    }
}
