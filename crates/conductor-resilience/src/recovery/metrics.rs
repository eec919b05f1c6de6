//! Recovery metrics: an in-memory registry for queries plus the `metrics`
//! facade for export.

use super::manager::RecoveryAction;
use chrono::{DateTime, Utc};
use conductor_core::Severity;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metric names exported by the recovery manager.
pub mod names {
    /// Errors routed through recovery.
    pub const ERRORS_TOTAL: &str = "conductor_recovery_errors_total";
    /// Recovery outcomes, labelled by action.
    pub const OUTCOMES_TOTAL: &str = "conductor_recovery_outcomes_total";
    /// Time spent deciding a recovery.
    pub const DURATION_SECONDS: &str = "conductor_recovery_duration_seconds";
}

/// Counters and averages for one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Successful executions reported through `record_execution`.
    pub executions: u64,
    /// Errors handled.
    pub errors: u64,
    /// Fallback values handed out.
    pub fallbacks_used: u64,
    /// Retries recommended.
    pub retry_attempts: u64,
    /// Skips.
    pub skips: u64,
    /// Terminal failures.
    pub failures: u64,
    /// Fallbacks plus skips.
    pub successful_recoveries: u64,
    /// Mean execution time in milliseconds.
    pub avg_execution_ms: f64,
    /// Mean recovery decision time in milliseconds.
    pub avg_recovery_ms: f64,
    /// Last error handled.
    pub last_error_at: Option<DateTime<Utc>>,
}

impl OperationMetrics {
    /// `errors / (errors + successful_recoveries)`, zero when nothing failed.
    pub fn error_rate(&self) -> f64 {
        error_rate(self.errors, self.successful_recoveries)
    }

    fn record_execution(&mut self, duration: Duration) {
        self.executions += 1;
        self.avg_execution_ms = running_mean(self.avg_execution_ms, self.executions, millis_f64(duration));
    }

    fn record_outcome(&mut self, action: &RecoveryAction, elapsed: Duration, at: DateTime<Utc>) {
        self.errors += 1;
        self.last_error_at = Some(at);
        match action {
            RecoveryAction::Fallback { .. } => {
                self.fallbacks_used += 1;
                self.successful_recoveries += 1;
            }
            RecoveryAction::Skip => {
                self.skips += 1;
                self.successful_recoveries += 1;
            }
            RecoveryAction::Retry { .. } => self.retry_attempts += 1,
            RecoveryAction::Fail { .. } => self.failures += 1,
        }
        self.avg_recovery_ms = running_mean(self.avg_recovery_ms, self.errors, millis_f64(elapsed));
    }
}

/// Aggregates across every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalRecoveryMetrics {
    /// Successful executions.
    pub total_executions: u64,
    /// Errors handled.
    pub total_errors: u64,
    /// Fallbacks plus skips.
    pub total_recoveries: u64,
    /// Fallback values handed out.
    pub total_fallbacks: u64,
    /// Retries recommended.
    pub total_retries: u64,
    /// Terminal failures.
    pub total_failures: u64,
    /// `total_errors / (total_errors + total_recoveries)`.
    pub error_rate: f64,
    /// Error counts per severity.
    pub by_severity: HashMap<Severity, u64>,
    /// Operations seen.
    pub operations: usize,
}

/// Thread-safe store of per-operation metrics.
#[derive(Debug, Default)]
pub struct RecoveryMetricsRegistry {
    operations: Mutex<HashMap<String, OperationMetrics>>,
    by_severity: Mutex<HashMap<Severity, u64>>,
}

impl RecoveryMetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful execution.
    pub fn record_execution(&self, operation: &str, duration: Duration) {
        self.operations
            .lock()
            .entry(operation.to_string())
            .or_default()
            .record_execution(duration);
    }

    /// Records a handled error and exports it.
    pub fn record_outcome(
        &self,
        operation: &str,
        severity: Severity,
        action: &RecoveryAction,
        elapsed: Duration,
        at: DateTime<Utc>,
    ) {
        self.operations
            .lock()
            .entry(operation.to_string())
            .or_default()
            .record_outcome(action, elapsed, at);
        *self.by_severity.lock().entry(severity).or_insert(0) += 1;

        counter!(
            names::ERRORS_TOTAL,
            "operation" => operation.to_string(),
            "severity" => severity.as_str()
        )
        .increment(1);
        counter!(
            names::OUTCOMES_TOTAL,
            "operation" => operation.to_string(),
            "action" => action.name()
        )
        .increment(1);
        histogram!(names::DURATION_SECONDS, "operation" => operation.to_string()).record(elapsed.as_secs_f64());
    }

    /// Snapshot for one operation.
    pub fn operation(&self, operation: &str) -> Option<OperationMetrics> {
        self.operations.lock().get(operation).cloned()
    }

    /// Aggregated snapshot.
    pub fn global(&self) -> GlobalRecoveryMetrics {
        let operations = self.operations.lock();
        let mut global = operations.values().fold(GlobalRecoveryMetrics::default(), |mut acc, m| {
            acc.total_executions += m.executions;
            acc.total_errors += m.errors;
            acc.total_recoveries += m.successful_recoveries;
            acc.total_fallbacks += m.fallbacks_used;
            acc.total_retries += m.retry_attempts;
            acc.total_failures += m.failures;
            acc
        });
        global.operations = operations.len();
        global.error_rate = error_rate(global.total_errors, global.total_recoveries);
        global.by_severity = self.by_severity.lock().clone();
        global
    }

    /// Drops every counter.
    pub fn reset(&self) {
        self.operations.lock().clear();
        self.by_severity.lock().clear();
    }
}

#[allow(clippy::cast_precision_loss)]
fn error_rate(errors: u64, recoveries: u64) -> f64 {
    let total = errors + recoveries;
    if total == 0 {
        0.0
    } else {
        errors as f64 / total as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn running_mean(mean: f64, count: u64, sample: f64) -> f64 {
    mean + (sample - mean) / count as f64
}

fn millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
