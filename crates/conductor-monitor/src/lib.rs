//! # Conductor Monitor
//!
//! Observes a running engine through a [`MetricsSource`]:
//! - periodic health checks rolled up to a worst-case [`SystemHealth`]
//! - threshold [`AlertRule`]s with evaluation windows and cooldowns
//! - alert delivery through pluggable [`AlertChannel`]s
//! - [`ProgressTracker`]s for long-running multi-phase operations

pub mod alerts;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod notifier;
pub mod progress;

pub use alerts::{default_rules, Alert, AlertManager, AlertRule, Comparison, MetricKind, RuleStatus};
pub use config::{HealthThresholds, MonitorConfig};
pub use error::{MonitorError, MonitorResult};
pub use health::{ComponentHealth, HealthLevel, MetricsSnapshot, MetricsSource, SystemHealth};
pub use metrics::{register_metrics, MonitorMetrics};
pub use monitor::Monitor;
pub use notifier::{AlertChannel, LogChannel, Notifier};
pub use progress::{Phase, ProgressEvent, ProgressRegistry, ProgressSnapshot, ProgressStatus, ProgressTracker};
