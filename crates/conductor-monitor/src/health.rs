//! Component health and the worst-case system rollup.

use crate::config::HealthThresholds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Point-in-time figures the monitor evaluates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub collected_at: DateTime<Utc>,

    pub pending: u64,
    pub running: u64,
    pub delayed: u64,

    /// Queue capacity, 0 when unbounded.
    pub max_queue_size: u64,

    /// Lifetime completed jobs.
    pub completed: u64,

    /// Lifetime failed and timed-out jobs.
    pub failed: u64,

    /// Recovery error rate in `[0, 1]`.
    pub error_rate: f64,

    pub avg_execution_ms: f64,
    pub avg_wait_ms: f64,

    pub workers_busy: u64,
    pub workers_total: u64,
    pub workers_running: bool,
}

impl MetricsSnapshot {
    /// Pending jobs as a share of capacity.
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.max_queue_size == 0 {
            0.0
        } else {
            self.pending as f64 / self.max_queue_size as f64
        }
    }

    /// Busy workers as a share of the pool.
    #[allow(clippy::cast_precision_loss)]
    pub fn saturation(&self) -> f64 {
        if self.workers_total == 0 {
            0.0
        } else {
            self.workers_busy as f64 / self.workers_total as f64
        }
    }
}

/// Supplies metrics to the monitor.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSource: Send + Sync {
    /// Current figures.
    fn snapshot(&self) -> MetricsSnapshot;
}

/// Health level, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    /// Classify a value where larger is worse.
    pub fn classify(value: f64, warning: f64, critical: f64) -> Self {
        if value >= critical {
            Self::Critical
        } else if value >= warning {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Numeric form for gauges.
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Healthy => 0.0,
            Self::Warning => 1.0,
            Self::Critical => 2.0,
        }
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub level: HealthLevel,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
}

impl ComponentHealth {
    fn new(name: &str, level: HealthLevel, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            level,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    fn metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

/// Rolled-up health of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Worst of the component levels.
    pub status: HealthLevel,
    pub queue: ComponentHealth,
    pub workers: ComponentHealth,
    pub performance: ComponentHealth,
    pub errors: ComponentHealth,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Evaluate a snapshot against thresholds.
    pub fn evaluate(snapshot: &MetricsSnapshot, thresholds: &HealthThresholds) -> Self {
        let queue = queue_health(snapshot, thresholds);
        let workers = worker_health(snapshot, thresholds);
        let performance = performance_health(snapshot, thresholds);
        let errors = error_health(snapshot, thresholds);

        let status = [queue.level, workers.level, performance.level, errors.level]
            .into_iter()
            .max()
            .unwrap_or_default();

        Self {
            status,
            queue,
            workers,
            performance,
            errors,
            checked_at: snapshot.collected_at,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthLevel::Healthy
    }

    /// Components in display order.
    pub fn components(&self) -> [&ComponentHealth; 4] {
        [&self.queue, &self.workers, &self.performance, &self.errors]
    }
}

#[allow(clippy::cast_precision_loss)]
fn queue_health(s: &MetricsSnapshot, t: &HealthThresholds) -> ComponentHealth {
    let backlog = HealthLevel::classify(s.pending as f64, t.backlog_warning as f64, t.backlog_critical as f64);
    let utilization = HealthLevel::classify(s.utilization(), t.utilization_warning, t.utilization_critical);
    let level = backlog.max(utilization);
    let message = match level {
        HealthLevel::Healthy => "queue is draining normally".to_string(),
        _ => format!(
            "{} pending jobs ({:.0}% of capacity)",
            s.pending,
            s.utilization() * 100.0
        ),
    };
    ComponentHealth::new("queue", level, message)
        .metric("pending", s.pending as f64)
        .metric("running", s.running as f64)
        .metric("delayed", s.delayed as f64)
        .metric("utilization", s.utilization())
}

#[allow(clippy::cast_precision_loss)]
fn worker_health(s: &MetricsSnapshot, t: &HealthThresholds) -> ComponentHealth {
    let (level, message) = if !s.workers_running && s.workers_total > 0 {
        (HealthLevel::Critical, "worker pool is not running".to_string())
    } else {
        let level = HealthLevel::classify(s.saturation(), t.saturation_warning, t.saturation_critical);
        (level, format!("{}/{} workers busy", s.workers_busy, s.workers_total))
    };
    ComponentHealth::new("workers", level, message)
        .metric("busy", s.workers_busy as f64)
        .metric("total", s.workers_total as f64)
        .metric("saturation", s.saturation())
}

fn performance_health(s: &MetricsSnapshot, t: &HealthThresholds) -> ComponentHealth {
    let level = HealthLevel::classify(s.avg_execution_ms, t.execution_warning_ms, t.execution_critical_ms);
    ComponentHealth::new(
        "performance",
        level,
        format!("average execution {:.0}ms", s.avg_execution_ms),
    )
    .metric("avg_execution_ms", s.avg_execution_ms)
    .metric("avg_wait_ms", s.avg_wait_ms)
}

#[allow(clippy::cast_precision_loss)]
fn error_health(s: &MetricsSnapshot, t: &HealthThresholds) -> ComponentHealth {
    let level = HealthLevel::classify(s.error_rate, t.error_rate_warning, t.error_rate_critical);
    ComponentHealth::new(
        "errors",
        level,
        format!("error rate {:.1}%", s.error_rate * 100.0),
    )
    .metric("error_rate", s.error_rate)
    .metric("failed", s.failed as f64)
    .metric("completed", s.completed as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> MetricsSnapshot {
        MetricsSnapshot {
            max_queue_size: 100,
            workers_total: 4,
            workers_running: true,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn test_idle_engine_is_healthy() {
        let health = SystemHealth::evaluate(&idle(), &HealthThresholds::default());
        assert!(health.is_healthy());
        assert!(health.components().iter().all(|c| c.level == HealthLevel::Healthy));
    }

    #[test]
    fn test_worst_case_rollup() {
        let snapshot = MetricsSnapshot {
            pending: 85,
            error_rate: 0.5,
            ..idle()
        };
        let health = SystemHealth::evaluate(&snapshot, &HealthThresholds::default());
        assert_eq!(health.queue.level, HealthLevel::Warning);
        assert_eq!(health.errors.level, HealthLevel::Critical);
        assert_eq!(health.status, HealthLevel::Critical);
    }

    #[test]
    fn test_stopped_pool_is_critical() {
        let snapshot = MetricsSnapshot {
            workers_running: false,
            ..idle()
        };
        let health = SystemHealth::evaluate(&snapshot, &HealthThresholds::default());
        assert_eq!(health.workers.level, HealthLevel::Critical);
    }

    #[test]
    fn test_ratios_with_zero_denominators() {
        let snapshot = MetricsSnapshot::default();
        assert_eq!(snapshot.utilization(), 0.0);
        assert_eq!(snapshot.saturation(), 0.0);
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(HealthLevel::classify(0.79, 0.8, 0.95), HealthLevel::Healthy);
        assert_eq!(HealthLevel::classify(0.8, 0.8, 0.95), HealthLevel::Warning);
        assert_eq!(HealthLevel::classify(0.95, 0.8, 0.95), HealthLevel::Critical);
        assert!(HealthLevel::Critical > HealthLevel::Warning);
    }

    #[test]
    fn test_mock_source() {
        let mut source = MockMetricsSource::new();
        source.expect_snapshot().times(1).returning(idle);
        let health = SystemHealth::evaluate(&source.snapshot(), &HealthThresholds::default());
        assert_eq!(health.workers.metrics["total"], 4.0);
    }
}
