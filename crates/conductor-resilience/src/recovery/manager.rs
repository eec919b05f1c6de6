//! The recovery manager: classifies a failure and decides what happens next.

use super::config::{ConfigMatch, RecoveryConfig, RecoverySettings, RecoveryStrategy, WILDCARD};
use super::error::ExecutionError;
use super::history::{ErrorHistory, ErrorRecord};
use super::metrics::{GlobalRecoveryMetrics, OperationMetrics, RecoveryMetricsRegistry};
use crate::retry::compute_delay;
use conductor_core::{ConductorResult, Severity, SharedClock};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The decision for one failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Succeed with this value.
    Fallback {
        /// Substitute result.
        value: Value,
    },
    /// Re-run after `delay` as attempt `next_attempt`.
    Retry {
        /// Backoff delay.
        delay: Duration,
        /// Attempt number for the re-run.
        next_attempt: u32,
    },
    /// Succeed with no value.
    Skip,
    /// Terminal failure.
    Fail {
        /// Original error message.
        message: String,
    },
}

impl RecoveryAction {
    /// Returns the action name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fallback { .. } => "fallback",
            Self::Retry { .. } => "retry",
            Self::Skip => "skip",
            Self::Fail { .. } => "fail",
        }
    }
}

/// Result of [`RecoveryManager::handle`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    /// What to do.
    pub action: RecoveryAction,
    /// Classified severity.
    pub severity: Severity,
    /// How the rule was found.
    pub matched: ConfigMatch,
}

impl RecoveryOutcome {
    /// True for fallback and skip.
    pub fn is_success(&self) -> bool {
        matches!(self.action, RecoveryAction::Fallback { .. } | RecoveryAction::Skip)
    }

    /// True if a retry is recommended.
    pub fn is_retry(&self) -> bool {
        matches!(self.action, RecoveryAction::Retry { .. })
    }

    /// True for a terminal failure.
    pub fn is_failure(&self) -> bool {
        matches!(self.action, RecoveryAction::Fail { .. })
    }

    /// True if a fallback value was handed out.
    pub fn fallback_used(&self) -> bool {
        matches!(self.action, RecoveryAction::Fallback { .. })
    }

    /// The fallback value, if any.
    pub fn value(&self) -> Option<&Value> {
        match &self.action {
            RecoveryAction::Fallback { value } => Some(value),
            _ => None,
        }
    }

    /// The recommended retry delay, if any.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self.action {
            RecoveryAction::Retry { delay, .. } => Some(delay),
            _ => None,
        }
    }

    /// The terminal failure message, if any.
    pub fn failure_message(&self) -> Option<&str> {
        match &self.action {
            RecoveryAction::Fail { message } => Some(message),
            _ => None,
        }
    }
}

/// Per-operation error classification and recovery.
///
/// Lookup order for an error of type `T` in operation `op`:
/// 1. an enabled rule for `op` listing `T`
/// 2. an enabled rule for `op` with `*` error types
/// 3. an enabled rule for operation `*`
/// 4. no rule: severity derived from `T`, strategy `fail`
#[derive(Debug)]
pub struct RecoveryManager {
    configs: RwLock<HashMap<String, Vec<RecoveryConfig>>>,
    default_fallbacks: RwLock<HashMap<String, Value>>,
    history: Mutex<ErrorHistory>,
    metrics: RecoveryMetricsRegistry,
    clock: SharedClock,
}

impl RecoveryManager {
    /// Creates a manager with default settings and no rules.
    pub fn new(clock: SharedClock) -> Self {
        let settings = RecoverySettings::default();
        Self {
            configs: RwLock::new(HashMap::new()),
            default_fallbacks: RwLock::new(HashMap::new()),
            history: Mutex::new(ErrorHistory::new(settings.history_capacity, settings.history_retain)),
            metrics: RecoveryMetricsRegistry::new(),
            clock,
        }
    }

    /// Creates a manager from settings, registering their rules.
    pub fn with_settings(settings: &RecoverySettings, clock: SharedClock) -> ConductorResult<Self> {
        let manager = Self {
            configs: RwLock::new(HashMap::new()),
            default_fallbacks: RwLock::new(HashMap::new()),
            history: Mutex::new(ErrorHistory::new(settings.history_capacity, settings.history_retain)),
            metrics: RecoveryMetricsRegistry::new(),
            clock,
        };
        for rule in &settings.rules {
            manager.register_config(rule.clone())?;
        }
        Ok(manager)
    }

    /// Registers a rule. A rule with the same operation and error types is replaced.
    pub fn register_config(&self, config: RecoveryConfig) -> ConductorResult<()> {
        config.validate()?;

        info!(
            operation = %config.operation,
            strategy = %config.strategy,
            error_types = ?config.error_types,
            "Registered recovery config"
        );

        let mut configs = self.configs.write();
        let list = configs.entry(config.operation.clone()).or_default();
        list.retain(|existing| !existing.same_matcher(&config));
        list.push(config);
        Ok(())
    }

    /// Enables or disables every rule of an operation. Returns false if none exist.
    pub fn set_enabled(&self, operation: &str, enabled: bool) -> bool {
        let mut configs = self.configs.write();
        match configs.get_mut(operation) {
            Some(list) if !list.is_empty() => {
                for config in list.iter_mut() {
                    config.enabled = enabled;
                }
                debug!(operation, enabled, "Recovery configs toggled");
                true
            }
            _ => false,
        }
    }

    /// Removes every rule of an operation, returning how many were removed.
    pub fn remove_config(&self, operation: &str) -> usize {
        self.configs.write().remove(operation).map_or(0, |list| list.len())
    }

    /// Rules registered for an operation.
    pub fn configs_for(&self, operation: &str) -> Vec<RecoveryConfig> {
        self.configs.read().get(operation).cloned().unwrap_or_default()
    }

    /// Sets the value used by fallback rules that carry none.
    pub fn register_default_fallback(&self, operation: impl Into<String>, value: Value) {
        self.default_fallbacks.write().insert(operation.into(), value);
    }

    /// Records a successful execution for metrics.
    pub fn record_execution(&self, operation: &str, duration: Duration) {
        self.metrics.record_execution(operation, duration);
    }

    /// Classifies `error` raised by attempt `attempt` (zero-based) of
    /// `operation` and decides what to do.
    pub fn handle(&self, operation: &str, error: &ExecutionError, context: &Value, attempt: u32) -> RecoveryOutcome {
        let started = Instant::now();

        let outcome = match self.lookup(operation, &error.kind) {
            Some((config, matched)) => RecoveryOutcome {
                action: self.apply(operation, &config.strategy, error, attempt),
                severity: config.severity,
                matched,
            },
            None => RecoveryOutcome {
                action: RecoveryAction::Fail {
                    message: error.message.clone(),
                },
                severity: Severity::from_error_kind(&error.kind),
                matched: ConfigMatch::Default,
            },
        };

        let elapsed = started.elapsed();
        let now = self.clock.now();
        self.metrics
            .record_outcome(operation, outcome.severity, &outcome.action, elapsed, now);
        self.history.lock().push(ErrorRecord {
            operation: operation.to_string(),
            kind: error.kind.clone(),
            message: error.message.clone(),
            severity: outcome.severity,
            attempt,
            action: outcome.action.name().to_string(),
            timestamp: now,
        });

        match &outcome.action {
            RecoveryAction::Fail { message } => warn!(
                operation,
                error_type = %error.kind,
                severity = %outcome.severity,
                attempt,
                error = %message,
                "Recovery failed"
            ),
            RecoveryAction::Retry { delay, next_attempt } => debug!(
                operation,
                error_type = %error.kind,
                delay_ms = delay.as_millis() as u64,
                next_attempt,
                "Retry recommended"
            ),
            action => info!(
                operation,
                error_type = %error.kind,
                action = action.name(),
                context = %context,
                "Recovered from error"
            ),
        }

        outcome
    }

    fn lookup(&self, operation: &str, kind: &str) -> Option<(RecoveryConfig, ConfigMatch)> {
        let configs = self.configs.read();

        if let Some(list) = configs.get(operation) {
            if let Some(config) = list.iter().find(|c| c.enabled && c.matches_exactly(kind)) {
                return Some((config.clone(), ConfigMatch::Exact));
            }
            if let Some(config) = list.iter().find(|c| c.enabled && c.is_wildcard()) {
                return Some((config.clone(), ConfigMatch::Wildcard));
            }
        }

        if operation != WILDCARD {
            if let Some(list) = configs.get(WILDCARD) {
                let global = list
                    .iter()
                    .find(|c| c.enabled && c.matches_exactly(kind))
                    .or_else(|| list.iter().find(|c| c.enabled && c.is_wildcard()));
                if let Some(config) = global {
                    return Some((config.clone(), ConfigMatch::Global));
                }
            }
        }

        None
    }

    fn apply(&self, operation: &str, strategy: &RecoveryStrategy, error: &ExecutionError, attempt: u32) -> RecoveryAction {
        match strategy {
            RecoveryStrategy::Fallback { fallback_value } => RecoveryAction::Fallback {
                value: self
                    .fallback_value(operation, fallback_value.as_ref())
                    .unwrap_or(Value::Null),
            },
            RecoveryStrategy::Retry {
                max_retries,
                retry_delay_ms,
                backoff,
                fallback_value,
            } => {
                if attempt < *max_retries {
                    RecoveryAction::Retry {
                        delay: compute_delay(*retry_delay_ms, *backoff, attempt, u64::MAX),
                        next_attempt: attempt + 1,
                    }
                } else if let Some(value) = self.fallback_value(operation, fallback_value.as_ref()) {
                    RecoveryAction::Fallback { value }
                } else {
                    RecoveryAction::Fail {
                        message: error.message.clone(),
                    }
                }
            }
            RecoveryStrategy::Skip => RecoveryAction::Skip,
            RecoveryStrategy::Fail => RecoveryAction::Fail {
                message: error.message.clone(),
            },
        }
    }

    fn fallback_value(&self, operation: &str, explicit: Option<&Value>) -> Option<Value> {
        explicit
            .cloned()
            .or_else(|| self.default_fallbacks.read().get(operation).cloned())
    }

    /// Metrics for one operation.
    pub fn metrics(&self, operation: &str) -> Option<OperationMetrics> {
        self.metrics.operation(operation)
    }

    /// Aggregated metrics.
    pub fn global_metrics(&self) -> GlobalRecoveryMetrics {
        self.metrics.global()
    }

    /// Newest handled errors first.
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        self.history.lock().recent(limit)
    }

    /// Number of stored error records.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Drops the error history and resets metrics.
    pub fn clear_history(&self) {
        self.history.lock().clear();
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::error_kinds;
    use crate::retry::Backoff;
    use conductor_core::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn manager() -> RecoveryManager {
        RecoveryManager::new(Arc::new(ManualClock::starting_now()))
    }

    #[test]
    fn test_exponential_retry_then_exhausted() {
        let manager = manager();
        manager
            .register_config(RecoveryConfig::retry("fetch", 2, 100, Backoff::Exponential))
            .unwrap();
        let err = ExecutionError::network("connection reset");

        let first = manager.handle("fetch", &err, &Value::Null, 0);
        assert_eq!(first.retry_delay(), Some(Duration::from_millis(100)));

        let second = manager.handle("fetch", &err, &Value::Null, 1);
        assert_eq!(second.retry_delay(), Some(Duration::from_millis(200)));

        let third = manager.handle("fetch", &err, &Value::Null, 2);
        assert!(third.is_failure());
        assert_eq!(third.failure_message(), Some("connection reset"));
    }

    #[test]
    fn test_retry_exhausted_uses_fallback_value() {
        let manager = manager();
        let mut config = RecoveryConfig::retry("fetch", 1, 50, Backoff::Linear);
        if let RecoveryStrategy::Retry { fallback_value, .. } = &mut config.strategy {
            *fallback_value = Some(json!([]));
        }
        manager.register_config(config).unwrap();

        let outcome = manager.handle("fetch", &ExecutionError::timeout("slow"), &Value::Null, 1);
        assert!(outcome.is_success());
        assert_eq!(outcome.value(), Some(&json!([])));
    }

    #[test]
    fn test_fallback_zero_on_type_error() {
        let manager = manager();
        manager
            .register_config(RecoveryConfig::fallback("calculate_total", json!(0)).for_errors([error_kinds::TYPE_ERROR]))
            .unwrap();

        let outcome = manager.handle(
            "calculate_total",
            &ExecutionError::type_error("price is not a number"),
            &json!({"field": "total"}),
            0,
        );

        assert!(outcome.is_success());
        assert!(outcome.fallback_used());
        assert_eq!(outcome.value(), Some(&json!(0)));
        assert_eq!(outcome.matched, ConfigMatch::Exact);
    }

    #[test]
    fn test_fallback_uses_registered_default() {
        let manager = manager();
        manager
            .register_config(RecoveryConfig::new(
                "score",
                RecoveryStrategy::Fallback { fallback_value: None },
            ))
            .unwrap();

        let outcome = manager.handle("score", &ExecutionError::other("x"), &Value::Null, 0);
        assert_eq!(outcome.value(), Some(&Value::Null));

        manager.register_default_fallback("score", json!(-1));
        let outcome = manager.handle("score", &ExecutionError::other("x"), &Value::Null, 0);
        assert_eq!(outcome.value(), Some(&json!(-1)));
    }

    #[test]
    fn test_lookup_precedence() {
        let manager = manager();
        manager.register_config(RecoveryConfig::skip("op").for_errors(["TypeError"])).unwrap();
        manager.register_config(RecoveryConfig::fallback("op", json!("w"))).unwrap();
        manager.register_config(RecoveryConfig::fallback("*", json!("g"))).unwrap();

        let exact = manager.handle("op", &ExecutionError::type_error("t"), &Value::Null, 0);
        assert_eq!(exact.matched, ConfigMatch::Exact);
        assert_eq!(exact.action, RecoveryAction::Skip);

        let wildcard = manager.handle("op", &ExecutionError::network("n"), &Value::Null, 0);
        assert_eq!(wildcard.matched, ConfigMatch::Wildcard);
        assert_eq!(wildcard.value(), Some(&json!("w")));

        let global = manager.handle("other", &ExecutionError::network("n"), &Value::Null, 0);
        assert_eq!(global.matched, ConfigMatch::Global);
        assert_eq!(global.value(), Some(&json!("g")));
    }

    #[test]
    fn test_default_classification_fails() {
        let manager = manager();

        let outcome = manager.handle("unknown", &ExecutionError::reference("missing"), &Value::Null, 0);
        assert_eq!(outcome.matched, ConfigMatch::Default);
        assert_eq!(outcome.severity, Severity::High);
        assert!(outcome.is_failure());

        let outcome = manager.handle("unknown", &ExecutionError::validation("bad"), &Value::Null, 0);
        assert_eq!(outcome.severity, Severity::Low);
    }

    #[test]
    fn test_disabled_config_is_ignored() {
        let manager = manager();
        manager.register_config(RecoveryConfig::skip("op")).unwrap();
        assert!(manager.set_enabled("op", false));
        assert!(!manager.set_enabled("missing", false));

        let outcome = manager.handle("op", &ExecutionError::other("x"), &Value::Null, 0);
        assert_eq!(outcome.matched, ConfigMatch::Default);

        assert!(manager.set_enabled("op", true));
        let outcome = manager.handle("op", &ExecutionError::other("x"), &Value::Null, 0);
        assert_eq!(outcome.action, RecoveryAction::Skip);
    }

    #[test]
    fn test_register_replaces_same_matcher() {
        let manager = manager();
        manager.register_config(RecoveryConfig::skip("op")).unwrap();
        manager.register_config(RecoveryConfig::fail("op")).unwrap();
        assert_eq!(manager.configs_for("op").len(), 1);
        assert_eq!(manager.remove_config("op"), 1);
        assert!(manager.configs_for("op").is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let manager = manager();
        assert!(manager.register_config(RecoveryConfig::skip("")).is_err());
        assert!(manager.configs_for("").is_empty());
    }

    #[test]
    fn test_history_and_metrics() {
        let manager = manager();
        manager.register_config(RecoveryConfig::skip("op")).unwrap();
        manager.record_execution("op", Duration::from_millis(5));
        manager.handle("op", &ExecutionError::other("one"), &Value::Null, 0);
        manager.handle("other", &ExecutionError::other("two"), &Value::Null, 0);

        let recent = manager.recent_errors(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "two");
        assert_eq!(recent[1].action, "skip");

        let op = manager.metrics("op").unwrap();
        assert_eq!(op.executions, 1);
        assert_eq!(op.skips, 1);

        let global = manager.global_metrics();
        assert_eq!(global.total_errors, 2);
        assert_eq!(global.total_failures, 1);
        assert!((global.error_rate - 2.0 / 3.0).abs() < f64::EPSILON);

        manager.clear_history();
        assert_eq!(manager.history_len(), 0);
    }

    #[test]
    fn test_settings_trim_bounds() {
        let settings = RecoverySettings {
            history_capacity: 4,
            history_retain: 2,
            rules: vec![RecoveryConfig::skip("op")],
        };
        let manager = RecoveryManager::with_settings(&settings, Arc::new(ManualClock::starting_now())).unwrap();
        for _ in 0..5 {
            manager.handle("op", &ExecutionError::other("x"), &Value::Null, 0);
        }
        assert_eq!(manager.history_len(), 2);
    }
}
