//! Job queue configuration.

use crate::job::JobTemplate;
use chrono::{DateTime, Utc};
use conductor_resilience::Backoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum pending jobs; 0 means unbounded.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Timeout for jobs that do not set one, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Retry budget for jobs that do not set one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Base delay used when no recovery rule matches a failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff used when no recovery rule matches a failure.
    #[serde(default)]
    pub retry_backoff: Backoff,

    /// Terminal jobs kept by periodic cleanup.
    #[serde(default = "default_retain_terminal")]
    pub retain_terminal: usize,

    /// Period of the terminal-job cleanup, in milliseconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            default_timeout_ms: default_timeout_ms(),
            default_max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_delay_ms(),
            retry_backoff: Backoff::default(),
            retain_terminal: default_retain_terminal(),
            cleanup_interval_ms: default_cleanup_interval(),
        }
    }
}

fn default_max_queue_size() -> usize {
    10_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retain_terminal() -> usize {
    1000
}

fn default_cleanup_interval() -> u64 {
    60_000
}

impl QueueConfig {
    /// Get cleanup interval as Duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fallback polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Grace period for in-flight jobs on stop, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .max(4)
}

fn default_poll_interval() -> u64 {
    100 // 100ms
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl WorkerConfig {
    /// Get poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable the tick loop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Smallest recurring interval accepted, in milliseconds.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval(),
            min_interval_ms: default_min_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_min_interval() -> u64 {
    1000
}

impl SchedulerConfig {
    /// Get tick interval as Duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// How a declared schedule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fire once at `at`.
    Once { at: DateTime<Utc> },
    /// Fire every `interval_ms` starting at `start` (default: now).
    Recurring {
        #[serde(default)]
        start: Option<DateTime<Utc>>,
        interval_ms: u64,
        #[serde(default)]
        max_runs: Option<u32>,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
    },
    /// Fire on a cron-lite expression.
    Cron {
        expression: String,
        #[serde(default)]
        max_runs: Option<u32>,
        #[serde(default)]
        end_date: Option<DateTime<Utc>>,
    },
}

/// A schedule declared in configuration and registered at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    /// Unique entry name.
    pub name: String,

    /// Timing.
    #[serde(flatten)]
    pub kind: ScheduleKind,

    /// Job to materialize.
    pub job: JobTemplate,

    /// Entry names or job ids that must be satisfied first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}
