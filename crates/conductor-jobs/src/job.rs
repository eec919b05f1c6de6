//! Job model: priority, status, the stored job record and the builder used
//! to submit new work.

use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::{EntryId, JobId};
use conductor_resilience::ExecutionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Job priority classes. Lower rank is dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    /// Time-sensitive work.
    High = 1,
    /// Default.
    Medium = 2,
    /// Background work.
    Low = 3,
}

impl Priority {
    /// All classes in dequeue order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Dequeue rank (1 = first).
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Index into per-priority arrays.
    pub(crate) fn index(self) -> usize {
        usize::from(self.rank() - 1)
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" | "normal" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(JobError::Configuration(format!("unknown priority '{other}'"))),
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue (possibly delayed).
    Pending,
    /// Being executed by a worker.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with a terminal error.
    Failed,
    /// Exceeded its timeout and was not recovered.
    Timeout,
    /// Cancelled by request or shutdown.
    Cancelled,
}

impl JobStatus {
    /// All statuses.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Timeout,
        JobStatus::Cancelled,
    ];

    /// Returns true if the job will not run again without a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }

    /// Returns true if `retry` may resubmit the job.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled)
    }

    /// Allowed status transitions.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Cancelled)
                | (Running, Pending)
                | (Failed, Pending)
                | (Timeout, Pending)
                | (Cancelled, Pending)
        )
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Display name.
    pub name: String,

    /// Selects the handler; also the recovery operation name.
    pub job_type: String,

    /// Priority class.
    pub priority: Priority,

    /// Current status.
    pub status: JobStatus,

    /// Handler input.
    pub payload: Value,

    /// Caller context passed to the handler.
    pub context: Value,

    /// When the job was submitted.
    pub created_at: DateTime<Utc>,

    /// Earliest dequeue time.
    pub ready_at: DateTime<Utc>,

    /// Start of the current or last execution.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Automatic retries since the last submission or resubmission.
    pub retry_count: u32,

    /// Resubmissions requested through [`PriorityJobQueue::retry`].
    ///
    /// [`PriorityJobQueue::retry`]: crate::queue::PriorityJobQueue::retry
    #[serde(default)]
    pub manual_retries: u32,

    /// Retries allowed when no recovery rule decides otherwise.
    pub max_retries: u32,

    /// Execution timeout in milliseconds.
    pub timeout_ms: u64,

    /// Handler or fallback result.
    pub result: Option<Value>,

    /// Last error.
    pub error: Option<ExecutionError>,

    /// The result came from a fallback.
    pub fallback_used: bool,

    /// Correlation ID for tracing.
    pub correlation_id: Option<String>,

    /// Tags for search.
    pub tags: Vec<String>,

    /// Scheduled entry that materialized this job.
    pub source_entry: Option<EntryId>,

    /// Worker that ran the job last.
    pub worker_id: Option<String>,
}

impl Job {
    /// Execution timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Moves to `next`, rejecting transitions that are not allowed.
    pub(crate) fn transition(&mut self, next: JobStatus) -> JobResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidState {
                expected: format!("a status that can become {next}"),
                actual: self.status.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Time spent waiting before the current execution started.
    pub fn wait_time(&self) -> Option<Duration> {
        self.started_at
            .and_then(|started| (started - self.ready_at.max(self.created_at)).to_std().ok())
    }

    /// Duration of the last execution, once terminal.
    pub fn execution_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => (completed - started).to_std().ok(),
            _ => None,
        }
    }
}

/// Execution context handed to a handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: JobId,

    /// Job type.
    pub job_type: String,

    /// Job name.
    pub name: String,

    /// Zero-based attempt number.
    pub attempt: u32,

    /// Retries allowed.
    pub max_retries: u32,

    /// Caller context.
    pub context: Value,

    /// Worker running the job.
    pub worker_id: String,

    /// Execution start.
    pub started_at: DateTime<Utc>,

    /// Signalled when the job is cancelled.
    pub cancellation: CancellationToken,
}

impl JobContext {
    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns true if this is the last attempt allowed by `max_retries`.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_retries
    }
}

/// Builder for submitting jobs with options.
#[derive(Debug, Clone)]
pub struct NewJob {
    job_type: String,
    name: Option<String>,
    payload: Option<Value>,
    context: Value,
    priority: Priority,
    delay: Option<Duration>,
    scheduled_at: Option<DateTime<Utc>>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    correlation_id: Option<String>,
    tags: Vec<String>,
    source_entry: Option<EntryId>,
}

impl NewJob {
    /// Creates a builder for a job of the given type.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            name: None,
            payload: None,
            context: Value::Null,
            priority: Priority::default(),
            delay: None,
            scheduled_at: None,
            timeout: None,
            max_retries: None,
            correlation_id: None,
            tags: Vec::new(),
            source_entry: None,
        }
    }

    /// Set the display name (defaults to the job type).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the payload. A declared payload must not be `null`.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the caller context (object or `null`).
    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set a delay before execution.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.scheduled_at = None;
        self
    }

    /// Schedule for a specific time.
    pub fn at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self.delay = None;
        self
    }

    /// Override the queue's default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the queue's default retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set correlation ID for tracing.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add multiple tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Record the scheduled entry that produced this job.
    pub(crate) fn source_entry(mut self, entry: EntryId) -> Self {
        self.source_entry = Some(entry);
        self
    }

    /// Job type.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Checks the submission boundary rules.
    pub fn validate(&self) -> JobResult<()> {
        if self.job_type.trim().is_empty() {
            return Err(JobError::Configuration("job type must not be empty".to_string()));
        }
        if matches!(self.payload, Some(Value::Null)) {
            return Err(JobError::Configuration(format!(
                "job '{}' declares a null payload",
                self.job_type
            )));
        }
        if !(self.context.is_object() || self.context.is_null()) {
            return Err(JobError::Configuration(format!(
                "job '{}' context must be an object or null",
                self.job_type
            )));
        }
        if matches!(self.timeout, Some(t) if t.is_zero()) {
            return Err(JobError::Configuration(format!(
                "job '{}' timeout must be positive",
                self.job_type
            )));
        }
        Ok(())
    }

    /// Build the stored job record.
    pub fn build(self, now: DateTime<Utc>, defaults: &QueueConfig) -> JobResult<Job> {
        self.validate()?;

        let ready_at = match (self.scheduled_at, self.delay) {
            (Some(at), _) => at,
            (None, Some(delay)) => now + ChronoDuration::from_std(delay).unwrap_or_default(),
            (None, None) => now,
        };
        let timeout_ms = self
            .timeout
            .map_or(defaults.default_timeout_ms, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));

        Ok(Job {
            id: JobId::new(),
            name: self.name.unwrap_or_else(|| self.job_type.clone()),
            job_type: self.job_type,
            priority: self.priority,
            status: JobStatus::Pending,
            payload: self.payload.unwrap_or(Value::Null),
            context: self.context,
            created_at: now,
            ready_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            manual_retries: 0,
            max_retries: self.max_retries.unwrap_or(defaults.default_max_retries),
            timeout_ms,
            result: None,
            error: None,
            fallback_used: false,
            correlation_id: self.correlation_id,
            tags: self.tags,
            source_entry: self.source_entry,
            worker_id: None,
        })
    }
}

/// Job shape stored in a scheduled entry and materialized on each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Handler key.
    pub job_type: String,

    /// Payload for every materialized job.
    #[serde(default)]
    pub payload: Value,

    /// Priority class.
    #[serde(default)]
    pub priority: Priority,

    /// Timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Retry budget override.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobTemplate {
    /// Template with the given type and payload.
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: Priority::default(),
            timeout_ms: None,
            max_retries: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Turns the template into a submission named after the entry.
    pub(crate) fn materialize(&self, entry_name: &str, entry_id: EntryId) -> NewJob {
        let mut job = NewJob::new(self.job_type.clone())
            .name(entry_name)
            .priority(self.priority)
            .source_entry(entry_id)
            .tag(format!("schedule:{entry_name}"));
        if !self.payload.is_null() {
            job = job.payload(self.payload.clone());
        }
        if let Some(ms) = self.timeout_ms {
            job = job.timeout(Duration::from_millis(ms));
        }
        if let Some(n) = self.max_retries {
            job = job.max_retries(n);
        }
        job
    }
}
