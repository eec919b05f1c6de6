//! The [`Engine`] facade: one explicitly constructed value owning the queue,
//! worker pool, recovery manager, scheduler and monitor.

use chrono::{DateTime, Utc};
use conductor_config::{format_validation_errors, ConfigValidator, EngineConfig};
use conductor_core::{AlertId, ConductorError, ConductorResult, EntryId, JobId, SharedClock};
use conductor_jobs::{
    BatchOutcome, BatchRunner, Dependent, EntryFilter, HandlerResult, Job, JobContext, JobHandler, JobResult,
    JobSearchQuery, JobSearchResult, JobStatus, JobTemplate, NewJob, PriorityJobQueue, QueueStats, ScheduleOptions,
    ScheduledEntry, Scheduler, SchedulerStats, UnitInput, WorkerPool, WorkerPoolConfig, WorkerPoolStats,
};
use conductor_monitor::{
    Alert, MetricsSnapshot, MetricsSource, Monitor, MonitorResult, ProgressRegistry, SystemHealth,
};
use conductor_resilience::{GlobalRecoveryMetrics, RecoveryConfig, RecoveryManager};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for a background loop before aborting it.
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Feeds the monitor from the live queue, pool and recovery manager.
struct EngineMetricsSource {
    queue: Arc<PriorityJobQueue>,
    workers: Arc<WorkerPool>,
    recovery: Arc<RecoveryManager>,
}

impl MetricsSource for EngineMetricsSource {
    fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.queue.stats();
        let workers = self.workers.stats();
        let recovery = self.recovery.global_metrics();

        MetricsSnapshot {
            collected_at: self.queue.clock().now(),
            pending: stats.pending() as u64,
            running: stats.running() as u64,
            delayed: stats.delayed as u64,
            max_queue_size: stats.max_queue_size as u64,
            completed: stats.lifetime.completed,
            failed: stats.lifetime.failed + stats.lifetime.timed_out,
            error_rate: recovery.error_rate,
            avg_execution_ms: stats.avg_execution_ms,
            avg_wait_ms: stats.avg_wait_ms,
            workers_busy: workers.busy as u64,
            workers_total: workers.concurrency as u64,
            workers_running: workers.running,
        }
    }
}

/// Background work orchestration engine.
pub struct Engine {
    config: EngineConfig,
    clock: SharedClock,
    queue: Arc<PriorityJobQueue>,
    recovery: Arc<RecoveryManager>,
    workers: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<Monitor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Engine {
    /// Build an engine from validated configuration.
    ///
    /// Recovery rules and declared schedules are registered here; an invalid
    /// rule or schedule fails the whole build.
    pub fn new(config: EngineConfig, clock: SharedClock) -> ConductorResult<Self> {
        ConfigValidator::validate(&config)
            .map_err(|errors| ConductorError::Configuration(format_validation_errors(&errors)))?;

        let recovery = Arc::new(RecoveryManager::with_settings(&config.recovery, clock.clone())?);
        let queue = Arc::new(PriorityJobQueue::new(config.queue.clone(), clock.clone()));
        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            recovery.clone(),
            WorkerPoolConfig::from(&config.worker),
        ));
        let scheduler = Arc::new(Scheduler::new(queue.clone(), config.scheduler.clone(), clock.clone()));

        for definition in &config.schedules {
            scheduler.register_definition(definition).map_err(|e| {
                ConductorError::Configuration(format!("Schedule '{}' rejected: {e}", definition.name))
            })?;
        }

        let source = Arc::new(EngineMetricsSource {
            queue: queue.clone(),
            workers: workers.clone(),
            recovery: recovery.clone(),
        });
        let monitor = Arc::new(Monitor::new(source, config.monitor.clone(), clock.clone()));

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            app = %config.app.name,
            environment = %config.app.environment,
            schedules = config.schedules.len(),
            recovery_rules = config.recovery.rules.len(),
            "Engine built"
        );

        Ok(Self {
            config,
            clock,
            queue,
            recovery,
            workers,
            scheduler,
            monitor,
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Configuration the engine was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine clock.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// The job queue.
    pub fn queue(&self) -> &Arc<PriorityJobQueue> {
        &self.queue
    }

    /// The recovery manager.
    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The monitor.
    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    // ---- handlers ----

    /// Register the handler for a job type.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        self.workers.register(job_type, handler);
    }

    /// Register an async closure for a job type.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.workers.register_fn(job_type, handler);
    }

    // ---- jobs ----

    /// Submit a job.
    pub fn submit_job(&self, job: NewJob) -> JobResult<JobId> {
        self.queue.submit(job)
    }

    /// Cancel a pending or running job. Returns the status after the call.
    pub fn cancel_job(&self, id: JobId) -> JobResult<JobStatus> {
        self.queue.cancel(id)
    }

    /// Put a failed, timed out or cancelled job back in the queue.
    pub fn retry_job(&self, id: JobId) -> JobResult<()> {
        self.queue.retry(id)
    }

    /// Current status of a job.
    pub fn get_job_status(&self, id: JobId) -> Option<JobStatus> {
        self.queue.status(id)
    }

    /// Full job record.
    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.queue.get(id)
    }

    /// Search stored jobs.
    pub fn search_jobs(&self, query: &JobSearchQuery) -> JobSearchResult {
        self.queue.search(query)
    }

    /// Queue statistics.
    pub fn get_queue_statistics(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Drop the oldest terminal jobs beyond the configured retention.
    pub fn cleanup_jobs(&self) -> usize {
        self.queue.cleanup(self.config.queue.retain_terminal)
    }

    /// Worker pool statistics.
    pub fn worker_stats(&self) -> WorkerPoolStats {
        self.workers.stats()
    }

    // ---- scheduling ----

    /// Schedule a single job at `at`.
    pub fn schedule_once(
        &self,
        name: impl Into<String>,
        at: DateTime<Utc>,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<EntryId> {
        self.scheduler.schedule_once(name, at, job, options)
    }

    /// Schedule a job every `interval_ms`, the first at `start`.
    pub fn schedule_recurring(
        &self,
        name: impl Into<String>,
        start: DateTime<Utc>,
        interval_ms: u64,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<EntryId> {
        self.scheduler.schedule_recurring(name, start, interval_ms, job, options)
    }

    /// Schedule a job on a cron-lite expression.
    pub fn schedule_cron(
        &self,
        name: impl Into<String>,
        expression: &str,
        job: JobTemplate,
        options: ScheduleOptions,
    ) -> JobResult<EntryId> {
        self.scheduler.schedule_cron(name, expression, job, options)
    }

    /// Remove a scheduled entry.
    pub fn cancel_scheduled_entry(&self, id: EntryId) -> JobResult<ScheduledEntry> {
        self.scheduler.cancel(id)
    }

    /// Scheduled entries matching `filter`.
    pub fn get_scheduled_entries(&self, filter: &EntryFilter) -> Vec<ScheduledEntry> {
        self.scheduler.entries(filter)
    }

    /// Scheduler statistics.
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    // ---- recovery and dependencies ----

    /// Register a recovery rule.
    pub fn register_recovery_config(&self, config: RecoveryConfig) -> ConductorResult<()> {
        self.recovery.register_config(config)
    }

    /// Aggregated recovery metrics.
    pub fn recovery_metrics(&self) -> GlobalRecoveryMetrics {
        self.recovery.global_metrics()
    }

    /// Execution order for `units`, dependencies first.
    pub fn resolve_dependencies<'a, T: Dependent>(&self, units: &'a [T]) -> JobResult<Vec<&'a T>> {
        conductor_jobs::resolve_dependencies(units)
    }

    /// Run `units` in dependency order, routing failures through the
    /// recovery rules registered for `operation`.
    pub async fn run_batch<T, F, Fut>(&self, operation: &str, units: &[T], run: F) -> JobResult<BatchOutcome>
    where
        T: Dependent,
        F: Fn(&T, UnitInput) -> Fut,
        Fut: Future<Output = HandlerResult>,
    {
        BatchRunner::new(operation, self.recovery.clone(), self.clock.clone())
            .run(units, run)
            .await
    }

    // ---- monitoring ----

    /// Run a health check now.
    pub fn get_system_health(&self) -> SystemHealth {
        self.monitor.check_health()
    }

    /// Unresolved alerts, most severe first.
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.monitor.active_alerts()
    }

    /// Acknowledge an alert.
    pub fn acknowledge_alert(&self, id: AlertId, who: &str) -> MonitorResult<Alert> {
        self.monitor.acknowledge_alert(id, who)
    }

    /// Progress trackers for long-running operations.
    pub fn progress(&self) -> &ProgressRegistry {
        self.monitor.progress()
    }

    // ---- lifecycle ----

    /// Check if the engine is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the workers and spawn the scheduler, monitor and cleanup loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(conductor_jobs::JobError::InvalidState {
                expected: "stopped".to_string(),
                actual: "running".to_string(),
            });
        }

        info!("Starting engine");
        if let Err(e) = self.workers.start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let mut tasks = self.tasks.lock();

        let scheduler = self.scheduler.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = scheduler.start().await {
                error!(error = %e, "Scheduler loop exited with error");
            }
        }));

        let monitor = self.monitor.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = monitor.start().await {
                error!(error = %e, "Monitor loop exited with error");
            }
        }));

        let queue = self.queue.clone();
        let retain = self.config.queue.retain_terminal;
        let period = self.config.queue.cleanup_interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut cleanup = interval(period);
            // the first tick completes immediately
            cleanup.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = cleanup.tick() => {
                        let removed = queue.cleanup(retain);
                        if removed > 0 {
                            debug!(removed, "Cleaned up terminal jobs");
                        }
                    }
                }
            }
        }));

        info!(
            workers = self.workers.stats().concurrency,
            schedules = self.scheduler.stats().entries,
            "Engine started"
        );
        Ok(())
    }

    /// Stop the engine: scheduler first, then the worker pool (which closes
    /// the queue and drains in-flight jobs), then the monitor.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping engine...");

        self.scheduler.stop();
        self.workers.stop().await;
        self.monitor.stop();
        let _ = self.shutdown_tx.send(());

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(LOOP_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Background loop did not stop in time, aborting");
                abort.abort();
            }
        }

        info!("Engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("app", &self.config.app.name)
            .field("running", &self.is_running())
            .field("workers", &self.workers)
            .field("scheduler", &self.scheduler.id())
            .finish()
    }
}
