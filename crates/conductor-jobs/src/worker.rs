//! Worker pool for processing jobs.

use crate::config::WorkerConfig;
use crate::error::{JobError, JobResult};
use crate::handler::{HandlerRegistry, HandlerResult, JobHandler};
use crate::job::{Job, JobContext, JobStatus};
use crate::metrics::WorkerMetrics;
use crate::queue::{Dispatch, PriorityJobQueue};
use conductor_resilience::{compute_delay, with_timeout, ConfigMatch, ExecutionError, RecoveryAction, RecoveryManager};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Error kind recorded for jobs whose type has no handler.
pub const CONFIGURATION_ERROR: &str = "ConfigurationError";

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub concurrency: usize,

    /// Polling interval used when no submit wakes an idle worker.
    pub poll_interval: Duration,

    /// Grace period for in-flight jobs on stop.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// State shared by the pool and its worker tasks.
struct Shared {
    pool_id: String,
    queue: Arc<PriorityJobQueue>,
    recovery: Arc<RecoveryManager>,
    handlers: HandlerRegistry,
    config: WorkerPoolConfig,
    busy: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Fixed-size pool of workers sharing one queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(queue: Arc<PriorityJobQueue>, recovery: Arc<RecoveryManager>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(Shared {
                pool_id: format!("worker-pool-{}", Uuid::now_v7()),
                queue,
                recovery,
                handlers: HandlerRegistry::new(),
                config,
                busy: AtomicUsize::new(0),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            shutdown_tx,
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler for a job type.
    pub fn register(&self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        self.shared.handlers.register(job_type, handler);
    }

    /// Register an async closure for a job type.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.handlers.register_fn(job_type, handler);
    }

    /// Handler used for job types with no registered handler.
    pub fn set_default_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.shared.handlers.set_default(handler);
    }

    /// Registered handlers.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.shared.handlers
    }

    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::InvalidState {
                expected: "stopped".to_string(),
                actual: "running".to_string(),
            });
        }

        let concurrency = self.shared.config.concurrency;
        info!(pool_id = %self.shared.pool_id, concurrency, "Starting worker pool");

        let mut tasks = self.tasks.lock();
        for n in 0..concurrency {
            let shared = self.shared.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            let worker_id = format!("{}-{n}", shared.pool_id);
            tasks.push(tokio::spawn(
                run_worker(shared, worker_id, shutdown_rx).instrument(info_span!("worker", worker = n)),
            ));
        }
        WorkerMetrics::update_workers(&self.shared.pool_id, 0, concurrency);
        Ok(())
    }

    /// Stop the pool.
    ///
    /// Closes the queue, waits up to the grace period for in-flight jobs,
    /// then cancels their tokens, aborts the remaining tasks and marks
    /// their jobs cancelled.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(pool_id = %self.shared.pool_id, "Stopping worker pool...");

        self.shared.queue.close();
        let _ = self.shutdown_tx.send(());

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let grace = self.shared.config.shutdown_timeout;
        let drained = tokio::time::timeout(grace, join_all(tasks.iter_mut())).await.is_ok();

        if !drained {
            let abandoned = self.shared.queue.cancel_running();
            warn!(
                pool_id = %self.shared.pool_id,
                in_flight = abandoned.len(),
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed, aborting workers"
            );
            for task in &tasks {
                task.abort();
            }
            join_all(tasks.iter_mut()).await;
            for id in abandoned {
                if let Err(e) = self.shared.queue.mark_abandoned(id) {
                    debug!(job_id = %id, error = %e, "Job finished before abort");
                }
            }
        }

        self.shared.busy.store(0, Ordering::Relaxed);
        info!(
            pool_id = %self.shared.pool_id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "Worker pool stopped"
        );
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the number of jobs processed successfully.
    pub fn jobs_processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    /// Get the number of jobs that ended in an error status.
    pub fn jobs_failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Get the pool ID.
    pub fn id(&self) -> &str {
        &self.shared.pool_id
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            id: self.shared.pool_id.clone(),
            running: self.is_running(),
            concurrency: self.shared.config.concurrency,
            busy: self.shared.busy.load(Ordering::Relaxed),
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.shared.pool_id)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    /// Pool ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Workers executing a job right now.
    pub busy: usize,

    /// Jobs completed (including fallback and skip).
    pub jobs_processed: u64,

    /// Jobs failed, timed out or cancelled.
    pub jobs_failed: u64,
}

impl WorkerPoolStats {
    /// Fraction of workers busy.
    #[allow(clippy::cast_precision_loss)]
    pub fn saturation(&self) -> f64 {
        if self.concurrency == 0 {
            0.0
        } else {
            self.busy as f64 / self.concurrency as f64
        }
    }
}

async fn run_worker(shared: Arc<Shared>, worker_id: String, mut shutdown_rx: broadcast::Receiver<()>) {
    debug!(worker_id = %worker_id, "Worker started");
    loop {
        match shared.queue.dequeue(&worker_id) {
            Some(dispatch) => process(&shared, &worker_id, dispatch).await,
            None => {
                if shared.queue.is_closed() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = shared.queue.wait_for_work(shared.config.poll_interval) => {}
                }
            }
        }
    }
    debug!(worker_id = %worker_id, "Worker exiting");
}

async fn process(shared: &Shared, worker_id: &str, dispatch: Dispatch) {
    let Dispatch { job, cancellation } = dispatch;

    let Some(handler) = shared.handlers.get(&job.job_type) else {
        error!(job_id = %job.id, job_type = %job.job_type, "No handler registered for job type");
        let error = ExecutionError::new(
            CONFIGURATION_ERROR,
            format!("no handler registered for job type '{}'", job.job_type),
        );
        finish(shared, &job, JobStatus::Failed, error);
        return;
    };

    let ctx = JobContext {
        job_id: job.id,
        job_type: job.job_type.clone(),
        name: job.name.clone(),
        attempt: job.retry_count,
        max_retries: job.max_retries,
        context: job.context.clone(),
        worker_id: worker_id.to_string(),
        started_at: job.started_at.unwrap_or_else(|| shared.queue.clock().now()),
        cancellation: cancellation.clone(),
    };

    debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.retry_count, "Processing job");
    let busy = shared.busy.fetch_add(1, Ordering::Relaxed) + 1;
    WorkerMetrics::update_workers(&shared.pool_id, busy, shared.config.concurrency);

    let started = Instant::now();
    let result = with_timeout(job.timeout(), handler.handle(job.payload.clone(), ctx)).await;
    let elapsed = started.elapsed();

    let busy = shared.busy.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    WorkerMetrics::update_workers(&shared.pool_id, busy, shared.config.concurrency);

    match result {
        Ok(Ok(value)) => {
            shared.recovery.record_execution(&job.job_type, elapsed);
            match shared.queue.complete(job.id, value, false) {
                Ok(()) => {
                    shared.processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to mark job as complete"),
            }
        }
        Ok(Err(err)) if cancellation.is_cancelled() => {
            debug!(job_id = %job.id, error = %err, "Handler stopped after cancellation");
            finish(shared, &job, JobStatus::Cancelled, err);
        }
        Ok(Err(err)) => {
            warn!(job_id = %job.id, error = %JobError::Execution(err.clone()), "Job execution failed");
            recover(shared, &job, err, false);
        }
        Err(_) => {
            let timeout = JobError::Timeout {
                job_id: job.id,
                timeout_ms: job.timeout_ms,
            };
            warn!(job_id = %job.id, error = %timeout, "Job timed out");
            let err = ExecutionError::timeout(timeout.to_string());
            if cancellation.is_cancelled() {
                finish(shared, &job, JobStatus::Cancelled, err);
            } else {
                recover(shared, &job, err, true);
            }
        }
    }
}

/// Routes a failure through the recovery manager and applies the outcome.
fn recover(shared: &Shared, job: &Job, err: ExecutionError, timed_out: bool) {
    let outcome = shared
        .recovery
        .handle(&job.job_type, &err, &job.context, job.retry_count);

    let applied = match outcome.action {
        RecoveryAction::Fallback { value } => shared.queue.complete(job.id, value, true).map(|()| {
            shared.processed.fetch_add(1, Ordering::Relaxed);
        }),
        RecoveryAction::Skip => shared.queue.complete(job.id, Value::Null, false).map(|()| {
            shared.processed.fetch_add(1, Ordering::Relaxed);
        }),
        RecoveryAction::Retry { delay, .. } => shared.queue.requeue(job.id, delay, err).map(|_| ()),
        RecoveryAction::Fail { .. } if outcome.matched == ConfigMatch::Default && job.retry_count < job.max_retries => {
            let queue_config = shared.queue.config();
            let delay = compute_delay(
                queue_config.retry_base_delay_ms,
                queue_config.retry_backoff,
                job.retry_count,
                u64::MAX,
            );
            shared.queue.requeue(job.id, delay, err).map(|_| ())
        }
        RecoveryAction::Fail { .. } => {
            let status = if timed_out { JobStatus::Timeout } else { JobStatus::Failed };
            finish(shared, job, status, err);
            Ok(())
        }
    };

    if let Err(e) = applied {
        error!(job_id = %job.id, error = %e, "Failed to apply recovery outcome");
    }
}

fn finish(shared: &Shared, job: &Job, status: JobStatus, err: ExecutionError) {
    match shared.queue.finish_with_error(job.id, status, err) {
        Ok(()) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => error!(job_id = %job.id, status = %status, error = %e, "Failed to record job failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::job::NewJob;
    use conductor_core::{JobId, SystemClock};
    use conductor_resilience::{Backoff, RecoveryConfig};
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    fn setup(queue_config: QueueConfig) -> (Arc<PriorityJobQueue>, Arc<RecoveryManager>, WorkerPool) {
        let clock = SystemClock::shared();
        let queue = Arc::new(PriorityJobQueue::new(queue_config, clock.clone()));
        let recovery = Arc::new(RecoveryManager::new(clock));
        let pool = WorkerPool::new(
            queue.clone(),
            recovery.clone(),
            WorkerPoolConfig {
                concurrency: 2,
                poll_interval: Duration::from_millis(10),
                shutdown_timeout: Duration::from_millis(200),
            },
        );
        (queue, recovery, pool)
    }

    async fn wait_terminal(queue: &PriorityJobQueue, id: JobId) -> Job {
        for _ in 0..500 {
            if let Some(job) = queue.get(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_completes_job() {
        let (queue, _, pool) = setup(QueueConfig::default());
        pool.register_fn("double", |payload: Value, _ctx: JobContext| async move {
            match payload["n"].as_i64() {
                Some(n) => Ok(json!(n * 2)),
                None => Err(ExecutionError::type_error("n must be a number")),
            }
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("double").payload(json!({"n": 21}))).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!(42)));
        assert!(!job.fallback_used);

        pool.stop().await;
        assert_eq!(pool.jobs_processed(), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_fails() {
        let (queue, _, pool) = setup(QueueConfig::default());
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("unknown").max_retries(0)).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.unwrap().kind, CONFIGURATION_ERROR);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_fallback_on_type_error() {
        let (queue, recovery, pool) = setup(QueueConfig::default());
        recovery
            .register_config(RecoveryConfig::fallback("calculate", json!(0)).for_errors(["TypeError"]))
            .unwrap();
        pool.register_fn("calculate", |_payload: Value, _ctx: JobContext| async move {
            Err(ExecutionError::type_error("not a number"))
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("calculate")).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!(0)));
        assert!(job.fallback_used);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let (queue, recovery, pool) = setup(QueueConfig::default());
        recovery
            .register_config(RecoveryConfig::retry("flaky", 2, 10, Backoff::Exponential))
            .unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        pool.register_fn("flaky", move |_payload: Value, _ctx: JobContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::network("unreachable"))
            }
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("flaky")).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_manual_retry_restores_retry_budget() {
        let (queue, recovery, pool) = setup(QueueConfig::default());
        recovery
            .register_config(RecoveryConfig::retry("flaky", 2, 10, Backoff::Exponential))
            .unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        pool.register_fn("flaky", move |_payload: Value, _ctx: JobContext| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::network("unreachable"))
            }
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("flaky")).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        queue.retry(id).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.manual_retries, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_default_retry_uses_job_budget() {
        let (queue, _, pool) = setup(QueueConfig {
            retry_base_delay_ms: 10,
            ..QueueConfig::default()
        });
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        pool.register_fn("once_flaky", move |_payload: Value, _ctx: JobContext| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ExecutionError::other("first attempt fails"))
                } else {
                    Ok(json!("ok"))
                }
            }
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("once_flaky").max_retries(1)).unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 1);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_status() {
        let (queue, _, pool) = setup(QueueConfig::default());
        pool.register_fn("slow", |_payload: Value, _ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });
        pool.start().unwrap();

        let id = queue
            .submit(NewJob::new("slow").timeout(Duration::from_millis(20)).max_retries(0))
            .unwrap();
        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Timeout);
        assert_eq!(job.error.unwrap().kind, "TimeoutError");
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (queue, _, pool) = setup(QueueConfig::default());
        pool.register_fn("cooperative", |_payload: Value, ctx: JobContext| async move {
            ctx.cancellation.cancelled().await;
            Err(ExecutionError::cancelled())
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("cooperative")).unwrap();
        for _ in 0..200 {
            if queue.status(id) == Some(JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(queue.cancel(id).unwrap(), JobStatus::Running);

        let job = wait_terminal(&queue, id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_aborts_after_grace_period() {
        let (queue, _, pool) = setup(QueueConfig::default());
        pool.register_fn("stubborn", |_payload: Value, _ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        pool.start().unwrap();

        let id = queue.submit(NewJob::new("stubborn").timeout(Duration::from_secs(120))).unwrap();
        for _ in 0..200 {
            if queue.status(id) == Some(JobStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(5), pool.stop())
            .await
            .expect("stop should return after the grace period");
        assert_eq!(queue.status(id), Some(JobStatus::Cancelled));
        assert!(!pool.is_running());
        assert!(matches!(queue.submit(NewJob::new("stubborn")), Err(JobError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_, _, pool) = setup(QueueConfig::default());
        pool.start().unwrap();
        assert!(pool.start().is_err());
        let stats = pool.stats();
        assert!(stats.running);
        assert_eq!(stats.concurrency, 2);
        pool.stop().await;
    }
}
