//! Conductor Jobs - In-Process Work Orchestration
//!
//! An in-memory job system with:
//! - Priority classes (high, medium, low) with FIFO ordering inside a class
//! - Delayed submission and retry backoff through a time index
//! - A fixed-size worker pool racing each job against its timeout
//! - Failure routing through the recovery manager (fallback, retry, skip, fail)
//! - Dependency resolution for named units and batch execution
//! - One-time, recurring and cron-lite scheduling
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                                                              │
//! │  Caller ──────────────┐        Scheduler (tick loop)         │
//! │                       │          │ due entries whose          │
//! │                       │          │ dependencies are met       │
//! │                       ▼          ▼                            │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                 PriorityJobQueue                        │  │
//! │  │  ┌────────┐ ┌────────┐ ┌────────┐   ┌──────────────┐    │  │
//! │  │  │  High  │ │ Medium │ │  Low   │ ◄─│ Delayed jobs │    │  │
//! │  │  └───┬────┘ └───┬────┘ └───┬────┘   └──────────────┘    │  │
//! │  │      └──────────┴──────────┘                            │  │
//! │  └────────────────────┬───────────────────────────────────┘  │
//! │                       ▼                                      │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  WorkerPool: handler ── timeout ── RecoveryManager      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor_jobs::prelude::*;
//!
//! let queue = Arc::new(PriorityJobQueue::new(QueueConfig::default(), SystemClock::shared()));
//! let pool = WorkerPool::new(queue.clone(), recovery, WorkerPoolConfig::default());
//! pool.register_fn("email", |payload, _ctx| async move { Ok(payload) });
//! pool.start()?;
//!
//! let id = queue.submit(NewJob::new("email").payload(json!({"to": "ops"})).priority(Priority::High))?;
//! ```

pub mod batch;
pub mod config;
pub mod cron;
pub mod dependency;
pub mod error;
pub mod handler;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod status;
pub mod worker;

pub use batch::{BatchOutcome, BatchRunner, UnitFailure, UnitInput};
pub use config::{JobsConfig, QueueConfig, ScheduleDefinition, ScheduleKind, SchedulerConfig, WorkerConfig};
pub use cron::{cron_expressions, CronLite};
pub use dependency::{resolve_dependencies, DependencyGraph, DependencyNode, Dependent, UnitSpec};
pub use error::{JobError, JobResult};
pub use handler::{HandlerRegistry, HandlerResult, JobHandler};
pub use job::{Job, JobContext, JobStatus, JobTemplate, NewJob, Priority};
pub use metrics::{register_metrics, JobMetrics, SchedulerMetrics, WorkerMetrics};
pub use queue::{Dispatch, PriorityJobQueue};
pub use scheduler::{
    EntryFilter, ScheduleOptions, ScheduleType, ScheduledEntry, Scheduler, SchedulerStats, TickReport,
};
pub use status::{JobSearchQuery, JobSearchResult, LifetimeCounters, PriorityCounts, QueueStats};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::handler::JobHandler;
    pub use crate::job::{JobStatus, NewJob, Priority};
    pub use crate::queue::PriorityJobQueue;
    pub use crate::worker::{WorkerPool, WorkerPoolConfig};
    pub use crate::{JobContext, JobError, JobResult, QueueConfig};
    pub use conductor_core::{JobId, SystemClock};
}
