//! Prometheus metrics for the queue, workers and scheduler.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job system.
pub mod names {
    /// Total jobs submitted.
    pub const JOBS_SUBMITTED_TOTAL: &str = "conductor_jobs_submitted_total";
    /// Total jobs rejected at submission.
    pub const JOBS_REJECTED_TOTAL: &str = "conductor_jobs_rejected_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "conductor_jobs_completed_total";
    /// Total jobs failed.
    pub const JOBS_FAILED_TOTAL: &str = "conductor_jobs_failed_total";
    /// Total jobs retried.
    pub const JOBS_RETRIED_TOTAL: &str = "conductor_jobs_retried_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "conductor_jobs_cancelled_total";
    /// Total jobs timed out.
    pub const JOBS_TIMED_OUT_TOTAL: &str = "conductor_jobs_timed_out_total";

    /// Current pending jobs.
    pub const JOBS_PENDING: &str = "conductor_jobs_pending";
    /// Current running jobs.
    pub const JOBS_RUNNING: &str = "conductor_jobs_running";
    /// Current delayed jobs.
    pub const JOBS_DELAYED: &str = "conductor_jobs_delayed";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "conductor_jobs_duration_seconds";
    /// Job wait time (time in queue) in seconds.
    pub const JOB_WAIT_TIME_SECONDS: &str = "conductor_jobs_wait_time_seconds";

    /// Busy workers.
    pub const WORKERS_BUSY: &str = "conductor_jobs_workers_busy";
    /// Worker pool concurrency.
    pub const WORKERS_CONCURRENCY: &str = "conductor_jobs_workers_concurrency";

    /// Scheduled entries materialized.
    pub const SCHEDULER_MATERIALIZED_TOTAL: &str = "conductor_scheduler_materialized_total";
    /// Entries skipped for unmet dependencies.
    pub const SCHEDULER_SKIPPED_TOTAL: &str = "conductor_scheduler_skipped_total";
    /// Registered entries.
    pub const SCHEDULER_ENTRIES: &str = "conductor_scheduler_entries";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total number of jobs submitted");
    describe_counter!(
        names::JOBS_REJECTED_TOTAL,
        "Total number of submissions rejected (queue full or shutting down)"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of job retries");
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of jobs cancelled");
    describe_counter!(
        names::JOBS_TIMED_OUT_TOTAL,
        "Total number of jobs that timed out"
    );

    describe_gauge!(names::JOBS_PENDING, "Current number of pending jobs");
    describe_gauge!(names::JOBS_RUNNING, "Current number of running jobs");
    describe_gauge!(names::JOBS_DELAYED, "Current number of delayed jobs");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );
    describe_histogram!(
        names::JOB_WAIT_TIME_SECONDS,
        "Job wait time (time in queue) in seconds"
    );

    describe_gauge!(names::WORKERS_BUSY, "Number of workers executing a job");
    describe_gauge!(
        names::WORKERS_CONCURRENCY,
        "Worker pool concurrency setting"
    );

    describe_counter!(
        names::SCHEDULER_MATERIALIZED_TOTAL,
        "Total number of scheduled entries materialized into jobs"
    );
    describe_counter!(
        names::SCHEDULER_SKIPPED_TOTAL,
        "Total number of due entries skipped for unmet dependencies"
    );
    describe_gauge!(names::SCHEDULER_ENTRIES, "Number of registered scheduled entries");
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job submitted.
    pub fn job_submitted(job_type: &str, priority: &str) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            "job_type" => job_type.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    /// Record a rejected submission.
    pub fn job_rejected(job_type: &str, reason: &'static str) {
        counter!(
            names::JOBS_REJECTED_TOTAL,
            "job_type" => job_type.to_string(),
            "reason" => reason
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(job_type: &str, duration: Duration, fallback_used: bool) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "job_type" => job_type.to_string(),
            "fallback" => if fallback_used { "true" } else { "false" }
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job failed.
    pub fn job_failed(job_type: &str, error_type: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "job_type" => job_type.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job retried.
    pub fn job_retried(job_type: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_type" => job_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    /// Record a job cancelled.
    pub fn job_cancelled(job_type: &str) {
        counter!(
            names::JOBS_CANCELLED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a job timeout.
    pub fn job_timed_out(job_type: &str) {
        counter!(
            names::JOBS_TIMED_OUT_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record job wait time.
    pub fn job_wait_time(job_type: &str, wait_time: Duration) {
        histogram!(
            names::JOB_WAIT_TIME_SECONDS,
            "job_type" => job_type.to_string()
        )
        .record(wait_time.as_secs_f64());
    }

    /// Update queue size gauges.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_queue_sizes(pending: usize, running: usize, delayed: usize) {
        gauge!(names::JOBS_PENDING).set(pending as f64);
        gauge!(names::JOBS_RUNNING).set(running as f64);
        gauge!(names::JOBS_DELAYED).set(delayed as f64);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update worker gauges.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_workers(pool_id: &str, busy: usize, concurrency: usize) {
        gauge!(
            names::WORKERS_BUSY,
            "pool_id" => pool_id.to_string()
        )
        .set(busy as f64);

        gauge!(
            names::WORKERS_CONCURRENCY,
            "pool_id" => pool_id.to_string()
        )
        .set(concurrency as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record an entry materialized.
    pub fn entry_materialized(entry_name: &str, schedule_type: &str) {
        counter!(
            names::SCHEDULER_MATERIALIZED_TOTAL,
            "entry" => entry_name.to_string(),
            "schedule_type" => schedule_type.to_string()
        )
        .increment(1);
    }

    /// Record an entry skipped for dependencies.
    pub fn entry_skipped(entry_name: &str) {
        counter!(
            names::SCHEDULER_SKIPPED_TOTAL,
            "entry" => entry_name.to_string()
        )
        .increment(1);
    }

    /// Update the entry count.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_entries(count: usize) {
        gauge!(names::SCHEDULER_ENTRIES).set(count as f64);
    }
}
