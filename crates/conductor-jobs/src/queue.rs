//! In-memory priority job queue.
//!
//! One FIFO per priority class plus a time index for delayed jobs. All state
//! sits behind a single mutex; workers wait on a [`Notify`] raised by submit.

use crate::config::QueueConfig;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobStatus, NewJob, Priority};
use crate::metrics::JobMetrics;
use crate::status::{JobSearchQuery, JobSearchResult, LifetimeCounters, PriorityCounts, QueueStats};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::{JobId, SharedClock};
use conductor_resilience::{error_kinds, ExecutionError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A job handed to a worker together with its cancellation token.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Snapshot of the job as it started running.
    pub job: Job,
    /// Signalled when the job is cancelled.
    pub cancellation: CancellationToken,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    #[allow(clippy::cast_precision_loss)]
    fn record(&mut self, sample: Duration) {
        self.count += 1;
        let ms = sample.as_secs_f64() * 1000.0;
        self.mean += (ms - self.mean) / self.count as f64;
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    ready: [VecDeque<JobId>; 3],
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,
    seq: u64,
    pending: usize,
    closed: bool,
    tokens: HashMap<JobId, CancellationToken>,
    lifetime: LifetimeCounters,
    wait: RunningMean,
    execution: RunningMean,
}

impl QueueState {
    fn enqueue(&mut self, id: JobId, priority: Priority, ready_at: DateTime<Utc>, now: DateTime<Utc>) {
        if ready_at <= now {
            self.ready[priority.index()].push_back(id);
        } else {
            self.delayed.insert((ready_at, self.seq), id);
            self.seq += 1;
        }
        self.pending += 1;
    }

    fn unlink(&mut self, id: JobId, priority: Priority) {
        self.ready[priority.index()].retain(|queued| *queued != id);
        self.delayed.retain(|_, queued| *queued != id);
    }

    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some((&(ready_at, _), _)) = self.delayed.first_key_value() {
            if ready_at > now {
                break;
            }
            if let Some((_, id)) = self.delayed.pop_first() {
                if let Some(job) = self.jobs.get(&id) {
                    self.ready[job.priority.index()].push_back(id);
                }
            }
        }
    }

    fn running_mut(&mut self, id: JobId) -> JobResult<&mut Job> {
        let job = self.jobs.get_mut(&id).ok_or_else(|| JobError::job_not_found(&id))?;
        if job.status != JobStatus::Running {
            return Err(JobError::InvalidState {
                expected: JobStatus::Running.to_string(),
                actual: job.status.to_string(),
            });
        }
        Ok(job)
    }

    fn publish_gauges(&self) {
        JobMetrics::update_queue_sizes(self.pending, self.tokens.len(), self.delayed.len());
    }
}

/// In-memory priority job queue.
#[derive(Debug)]
pub struct PriorityJobQueue {
    config: QueueConfig,
    clock: SharedClock,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityJobQueue {
    /// Creates an empty queue.
    pub fn new(config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Clock used for readiness and timestamps.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Submits a job.
    ///
    /// Fails with [`JobError::QueueFull`] when `max_queue_size` jobs are
    /// pending and with [`JobError::ShuttingDown`] once the queue is closed.
    pub fn submit(&self, new_job: NewJob) -> JobResult<JobId> {
        let now = self.clock.now();
        let job_type = new_job.job_type().to_string();
        let job = new_job.build(now, &self.config)?;

        let mut state = self.state.lock();
        if state.closed {
            state.lifetime.rejected += 1;
            JobMetrics::job_rejected(&job_type, "shutting_down");
            return Err(JobError::ShuttingDown);
        }
        if self.config.max_queue_size > 0 && state.pending >= self.config.max_queue_size {
            state.lifetime.rejected += 1;
            JobMetrics::job_rejected(&job_type, "queue_full");
            warn!(job_type = %job_type, pending = state.pending, "Queue full, rejecting job");
            return Err(JobError::QueueFull {
                pending: state.pending,
                max_size: self.config.max_queue_size,
            });
        }

        let id = job.id;
        let priority = job.priority;
        let ready_at = job.ready_at;
        state.jobs.insert(id, job);
        state.enqueue(id, priority, ready_at, now);
        state.lifetime.submitted += 1;
        state.publish_gauges();
        drop(state);

        JobMetrics::job_submitted(&job_type, priority.as_str());
        debug!(job_id = %id, job_type = %job_type, priority = %priority, "Job submitted");
        self.notify.notify_one();
        Ok(id)
    }

    /// Takes the next ready job, highest priority first, FIFO within a class.
    ///
    /// Returns `None` when nothing is ready or the queue is closed.
    pub fn dequeue(&self, worker_id: &str) -> Option<Dispatch> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.promote_due(now);

        for priority in Priority::ALL {
            while let Some(id) = state.ready[priority.index()].pop_front() {
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                if job.status != JobStatus::Pending {
                    continue;
                }
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                job.worker_id = Some(worker_id.to_string());
                let job = job.clone();

                let token = CancellationToken::new();
                state.tokens.insert(id, token.clone());
                state.pending = state.pending.saturating_sub(1);
                if let Some(wait) = job.wait_time() {
                    state.wait.record(wait);
                    JobMetrics::job_wait_time(&job.job_type, wait);
                }
                state.publish_gauges();

                return Some(Dispatch {
                    job,
                    cancellation: token,
                });
            }
        }
        None
    }

    /// Waits until a submit signals new work or `poll_interval` elapses.
    pub async fn wait_for_work(&self, poll_interval: Duration) {
        let _ = tokio::time::timeout(poll_interval, self.notify.notified()).await;
    }

    /// Marks a running job completed.
    pub fn complete(&self, id: JobId, result: Value, fallback_used: bool) -> JobResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.transition(JobStatus::Completed)?;
        job.result = Some(result);
        job.fallback_used = fallback_used;
        job.completed_at = Some(now);
        let execution = job.execution_time().unwrap_or_default();
        let job_type = job.job_type.clone();

        state.tokens.remove(&id);
        state.lifetime.completed += 1;
        if fallback_used {
            state.lifetime.fallbacks += 1;
        }
        state.execution.record(execution);
        state.publish_gauges();
        drop(state);

        JobMetrics::job_completed(&job_type, execution, fallback_used);
        debug!(job_id = %id, fallback_used, "Job completed");
        Ok(())
    }

    /// Moves a running job to a terminal error status
    /// (`failed`, `timeout` or `cancelled`).
    pub fn finish_with_error(&self, id: JobId, status: JobStatus, error: ExecutionError) -> JobResult<()> {
        if !matches!(status, JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled) {
            return Err(JobError::InvalidState {
                expected: "failed, timeout or cancelled".to_string(),
                actual: status.to_string(),
            });
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.transition(status)?;
        job.completed_at = Some(now);
        let execution = job.execution_time().unwrap_or_default();
        let job_type = job.job_type.clone();
        let kind = error.kind.clone();
        job.error = Some(error);

        state.tokens.remove(&id);
        match status {
            JobStatus::Failed => {
                state.lifetime.failed += 1;
                JobMetrics::job_failed(&job_type, &kind, execution);
            }
            JobStatus::Timeout => {
                state.lifetime.timed_out += 1;
                JobMetrics::job_timed_out(&job_type);
            }
            _ => {
                state.lifetime.cancelled += 1;
                JobMetrics::job_cancelled(&job_type);
            }
        }
        state.execution.record(execution);
        state.publish_gauges();
        drop(state);

        info!(job_id = %id, status = %status, error_type = %kind, "Job finished with error");
        Ok(())
    }

    /// Puts a running job back as pending after `delay`, counting a retry.
    pub fn requeue(&self, id: JobId, delay: Duration, error: ExecutionError) -> JobResult<u32> {
        let now = self.clock.now();
        let ready_at = now + ChronoDuration::from_std(delay).unwrap_or_default();

        let mut state = self.state.lock();
        let job = state.running_mut(id)?;
        job.transition(JobStatus::Pending)?;
        job.retry_count += 1;
        job.ready_at = ready_at;
        job.error = Some(error);
        job.worker_id = None;
        let retry_count = job.retry_count;
        let priority = job.priority;
        let job_type = job.job_type.clone();

        state.tokens.remove(&id);
        state.enqueue(id, priority, ready_at, now);
        state.lifetime.retried += 1;
        state.publish_gauges();
        drop(state);

        JobMetrics::job_retried(&job_type, retry_count);
        debug!(job_id = %id, retry_count, delay_ms = delay.as_millis() as u64, "Job requeued for retry");
        self.notify.notify_one();
        Ok(retry_count)
    }

    /// Cancels a job.
    ///
    /// A pending job becomes `cancelled` immediately. A running job has its
    /// token signalled and stays `running` until its handler returns.
    /// Returns the status after the call.
    pub fn cancel(&self, id: JobId) -> JobResult<JobStatus> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let job = state.jobs.get_mut(&id).ok_or_else(|| JobError::job_not_found(&id))?;

        match job.status {
            JobStatus::Pending => {
                job.transition(JobStatus::Cancelled)?;
                job.completed_at = Some(now);
                let priority = job.priority;
                let job_type = job.job_type.clone();
                state.unlink(id, priority);
                state.pending = state.pending.saturating_sub(1);
                state.lifetime.cancelled += 1;
                state.publish_gauges();
                drop(state);

                JobMetrics::job_cancelled(&job_type);
                info!(job_id = %id, "Pending job cancelled");
                Ok(JobStatus::Cancelled)
            }
            JobStatus::Running => {
                if let Some(token) = state.tokens.get(&id) {
                    token.cancel();
                }
                info!(job_id = %id, "Cancellation requested for running job");
                Ok(JobStatus::Running)
            }
            other => Err(JobError::InvalidState {
                expected: "pending or running".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Returns true if cancellation was requested for a running job.
    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.state
            .lock()
            .tokens
            .get(&id)
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Resubmits a failed, timed out or cancelled job under the same id.
    ///
    /// The job gets its full automatic retry budget back.
    pub fn retry(&self, id: JobId) -> JobResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.closed {
            return Err(JobError::ShuttingDown);
        }
        if self.config.max_queue_size > 0 && state.pending >= self.config.max_queue_size {
            return Err(JobError::QueueFull {
                pending: state.pending,
                max_size: self.config.max_queue_size,
            });
        }

        let job = state.jobs.get_mut(&id).ok_or_else(|| JobError::job_not_found(&id))?;
        if !job.status.is_retryable() {
            return Err(JobError::InvalidState {
                expected: "failed, timeout or cancelled".to_string(),
                actual: job.status.to_string(),
            });
        }
        job.transition(JobStatus::Pending)?;
        job.manual_retries += 1;
        job.retry_count = 0;
        job.ready_at = now;
        job.started_at = None;
        job.completed_at = None;
        job.result = None;
        job.fallback_used = false;
        job.worker_id = None;
        let priority = job.priority;

        state.enqueue(id, priority, now, now);
        state.lifetime.retried += 1;
        state.publish_gauges();
        drop(state);

        info!(job_id = %id, "Job resubmitted by request");
        self.notify.notify_one();
        Ok(())
    }

    /// Snapshot of a job.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// Current status of a job.
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.state.lock().jobs.get(&id).map(|job| job.status)
    }

    /// Searches stored jobs, oldest first.
    pub fn search(&self, query: &JobSearchQuery) -> JobSearchResult {
        let state = self.state.lock();
        let mut matching: Vec<&Job> = state.jobs.values().filter(|job| query.matches(job)).collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let limit = query.effective_limit();
        JobSearchResult {
            total: matching.len(),
            jobs: matching
                .into_iter()
                .skip(query.offset)
                .take(limit)
                .cloned()
                .collect(),
            offset: query.offset,
            limit,
        }
    }

    /// Removes the oldest terminal jobs beyond `retain`. Returns how many were removed.
    pub fn cleanup(&self, retain: usize) -> usize {
        let mut state = self.state.lock();
        let mut terminal: Vec<(DateTime<Utc>, JobId)> = state
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .map(|job| (job.completed_at.unwrap_or(job.created_at), job.id))
            .collect();
        if terminal.len() <= retain {
            return 0;
        }

        terminal.sort();
        let excess = terminal.len() - retain;
        for (_, id) in terminal.into_iter().take(excess) {
            state.jobs.remove(&id);
        }
        drop(state);

        info!(removed = excess, retain, "Cleaned up terminal jobs");
        excess
    }

    /// Queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut by_status: HashMap<JobStatus, usize> = JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut pending_by_priority = PriorityCounts::default();
        for job in state.jobs.values() {
            *by_status.entry(job.status).or_insert(0) += 1;
            if job.status == JobStatus::Pending {
                pending_by_priority.add(job.priority);
            }
        }

        QueueStats {
            total: state.jobs.len(),
            by_status,
            pending_by_priority,
            delayed: state.delayed.len(),
            lifetime: state.lifetime,
            avg_wait_ms: state.wait.mean,
            avg_execution_ms: state.execution.mean,
            max_queue_size: self.config.max_queue_size,
            accepting: !state.closed,
        }
    }

    /// Pending jobs.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending
    }

    /// Running jobs.
    pub fn running_count(&self) -> usize {
        self.state.lock().tokens.len()
    }

    /// Stops accepting submissions and dequeues, and wakes idle workers.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        info!("Job queue closed");
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Signals every running job's token. Returns the affected ids.
    pub fn cancel_running(&self) -> Vec<JobId> {
        let state = self.state.lock();
        state
            .tokens
            .iter()
            .map(|(id, token)| {
                token.cancel();
                *id
            })
            .collect()
    }

    /// Marks a running job cancelled after its task was abandoned.
    pub fn mark_abandoned(&self, id: JobId) -> JobResult<()> {
        let error = ExecutionError::new(error_kinds::CANCELLED, "cancelled at shutdown");
        self.finish_with_error(id, JobStatus::Cancelled, error)
    }
}
