//! Configuration validation.
//!
//! Every section is checked and all problems are reported together, so a
//! bad config fails once at startup with the complete list.

use crate::EngineConfig;
use conductor_jobs::{CronLite, ScheduleDefinition, ScheduleKind};
use conductor_monitor::HealthThresholds;
use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    /// Worker pool needs at least one worker.
    #[error("Worker concurrency must be at least 1")]
    InvalidConcurrency,

    /// Interval or timeout must be positive.
    #[error("{name} must be positive, got {value}")]
    NonPositiveInterval { name: &'static str, value: u64 },

    /// Recovery history bounds are inconsistent.
    #[error("Recovery history: retain ({retain}) must be positive and not exceed capacity ({capacity})")]
    InvalidHistoryBounds { capacity: usize, retain: usize },

    /// A recovery rule is invalid.
    #[error("Recovery rule {index}: {message}")]
    InvalidRecoveryRule { index: usize, message: String },

    /// Ratio outside `[0, 1]`.
    #[error("{name} must be between 0.0 and 1.0, got {value}")]
    InvalidRatio { name: &'static str, value: f64 },

    /// Warning threshold above the critical one.
    #[error("{name}: warning threshold exceeds critical threshold")]
    ThresholdOrder { name: &'static str },

    /// Two schedules share a name.
    #[error("Duplicate schedule name: {name}")]
    DuplicateSchedule { name: String },

    /// A schedule definition is invalid.
    #[error("Schedule '{name}': {message}")]
    InvalidSchedule { name: String, message: String },

    /// Alert rule is invalid.
    #[error("Alert rule '{name}': {message}")]
    InvalidAlertRule { name: String, message: String },

    /// Log filter is empty.
    #[error("Log filter must not be empty")]
    EmptyLogFilter,

    /// Metrics listen address does not parse.
    #[error("Invalid metrics listen address: {value}")]
    InvalidListenAddr { value: String },
}

/// Result of configuration validation containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    fn require_positive(&mut self, name: &'static str, value: u64) {
        if value == 0 {
            self.add_error(ConfigValidationError::NonPositiveInterval { name, value });
        }
    }

    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire engine configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &EngineConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::default();

        Self::validate_jobs(config, &mut result);
        Self::validate_recovery(config, &mut result);
        Self::validate_monitor(config, &mut result);
        Self::validate_schedules(config, &mut result);
        Self::validate_observability(config, &mut result);

        result.into_result()
    }

    fn validate_jobs(config: &EngineConfig, result: &mut ValidationResult) {
        if config.worker.concurrency == 0 {
            result.add_error(ConfigValidationError::InvalidConcurrency);
        }
        result.require_positive("worker.poll_interval_ms", config.worker.poll_interval_ms);
        result.require_positive("queue.default_timeout_ms", config.queue.default_timeout_ms);
        result.require_positive("queue.cleanup_interval_ms", config.queue.cleanup_interval_ms);
        result.require_positive("scheduler.tick_interval_ms", config.scheduler.tick_interval_ms);
        result.require_positive("scheduler.min_interval_ms", config.scheduler.min_interval_ms);
    }

    fn validate_recovery(config: &EngineConfig, result: &mut ValidationResult) {
        let recovery = &config.recovery;
        if recovery.history_retain == 0 || recovery.history_retain > recovery.history_capacity {
            result.add_error(ConfigValidationError::InvalidHistoryBounds {
                capacity: recovery.history_capacity,
                retain: recovery.history_retain,
            });
        }
        for (index, rule) in recovery.rules.iter().enumerate() {
            if let Err(e) = rule.validate() {
                result.add_error(ConfigValidationError::InvalidRecoveryRule {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }

    fn validate_monitor(config: &EngineConfig, result: &mut ValidationResult) {
        let monitor = &config.monitor;
        result.require_positive("monitor.health_interval_ms", monitor.health_interval_ms);
        result.require_positive("monitor.alert_interval_ms", monitor.alert_interval_ms);
        Self::validate_thresholds(&monitor.thresholds, result);

        for rule in &monitor.rules {
            if rule.name.trim().is_empty() {
                result.add_error(ConfigValidationError::InvalidAlertRule {
                    name: rule.name.clone(),
                    message: "name must not be empty".into(),
                });
            }
            if !rule.threshold.is_finite() {
                result.add_error(ConfigValidationError::InvalidAlertRule {
                    name: rule.name.clone(),
                    message: "threshold must be finite".into(),
                });
            }
            if rule.window_secs == 0 {
                result.add_error(ConfigValidationError::InvalidAlertRule {
                    name: rule.name.clone(),
                    message: "window must be positive".into(),
                });
            }
        }
    }

    fn validate_thresholds(t: &HealthThresholds, result: &mut ValidationResult) {
        for (name, value) in [
            ("monitor.thresholds.utilization_warning", t.utilization_warning),
            ("monitor.thresholds.utilization_critical", t.utilization_critical),
            ("monitor.thresholds.error_rate_warning", t.error_rate_warning),
            ("monitor.thresholds.error_rate_critical", t.error_rate_critical),
            ("monitor.thresholds.saturation_warning", t.saturation_warning),
            ("monitor.thresholds.saturation_critical", t.saturation_critical),
        ] {
            if !(0.0..=1.0).contains(&value) {
                result.add_error(ConfigValidationError::InvalidRatio { name, value });
            }
        }

        let ordered = [
            ("backlog", t.backlog_warning <= t.backlog_critical),
            ("utilization", t.utilization_warning <= t.utilization_critical),
            ("saturation", t.saturation_warning <= t.saturation_critical),
            ("execution", t.execution_warning_ms <= t.execution_critical_ms),
            ("error_rate", t.error_rate_warning <= t.error_rate_critical),
        ];
        for (name, ok) in ordered {
            if !ok {
                result.add_error(ConfigValidationError::ThresholdOrder { name });
            }
        }
    }

    fn validate_schedules(config: &EngineConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for definition in &config.schedules {
            if !seen.insert(definition.name.as_str()) {
                result.add_error(ConfigValidationError::DuplicateSchedule {
                    name: definition.name.clone(),
                });
            }
            if let Err(message) = Self::check_schedule(definition, config.scheduler.min_interval_ms) {
                result.add_error(ConfigValidationError::InvalidSchedule {
                    name: definition.name.clone(),
                    message,
                });
            }
        }
    }

    fn check_schedule(definition: &ScheduleDefinition, min_interval_ms: u64) -> Result<(), String> {
        if definition.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if definition.job.job_type.trim().is_empty() {
            return Err("job type must not be empty".into());
        }
        match &definition.kind {
            ScheduleKind::Once { .. } => Ok(()),
            ScheduleKind::Recurring { interval_ms, .. } if *interval_ms < min_interval_ms => Err(format!(
                "interval {interval_ms}ms is below the minimum of {min_interval_ms}ms"
            )),
            ScheduleKind::Recurring { .. } => Ok(()),
            ScheduleKind::Cron { expression, .. } => CronLite::parse(expression).map(|_| ()).map_err(|e| e.to_string()),
        }
    }

    fn validate_observability(config: &EngineConfig, result: &mut ValidationResult) {
        if config.telemetry.log_filter.trim().is_empty() {
            result.add_error(ConfigValidationError::EmptyLogFilter);
        }
        if config.metrics.enabled && config.metrics.listen_addr.parse::<SocketAddr>().is_err() {
            result.add_error(ConfigValidationError::InvalidListenAddr {
                value: config.metrics.listen_addr.clone(),
            });
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_jobs::JobTemplate;
    use conductor_resilience::{Backoff, RecoveryConfig};
    use serde_json::json;

    fn schedule(name: &str, kind: ScheduleKind) -> ScheduleDefinition {
        ScheduleDefinition {
            name: name.to_string(),
            kind,
            job: JobTemplate::new("noop", json!(null)),
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn test_default_config_passes() {
        assert!(ConfigValidator::validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency() {
        let mut config = EngineConfig::default();
        config.worker.concurrency = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::InvalidConcurrency));
    }

    #[test]
    fn test_zero_intervals() {
        let mut config = EngineConfig::default();
        config.scheduler.tick_interval_ms = 0;
        config.monitor.alert_interval_ms = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::NonPositiveInterval { name, .. } if *name == "scheduler.tick_interval_ms"
        )));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_invalid_recovery_rule() {
        let mut config = EngineConfig::default();
        config
            .recovery
            .rules
            .push(RecoveryConfig::retry("calculate", 0, 100, Backoff::Exponential));

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigValidationError::InvalidRecoveryRule { index: 0, .. }
        ));
    }

    #[test]
    fn test_history_bounds() {
        let mut config = EngineConfig::default();
        config.recovery.history_retain = 2_000;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(errors[0], ConfigValidationError::InvalidHistoryBounds { .. }));
    }

    #[test]
    fn test_threshold_checks() {
        let mut config = EngineConfig::default();
        config.monitor.thresholds.error_rate_warning = 1.5;
        config.monitor.thresholds.backlog_warning = 10_000;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ConfigValidationError::InvalidRatio { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigValidationError::ThresholdOrder { name } if *name == "backlog")));
    }

    #[test]
    fn test_schedule_checks() {
        let mut config = EngineConfig::default();
        config.schedules = vec![
            schedule(
                "fast",
                ScheduleKind::Recurring {
                    start: None,
                    interval_ms: 10,
                    max_runs: None,
                    end_date: None,
                },
            ),
            schedule(
                "bad-cron",
                ScheduleKind::Cron {
                    expression: "* * *".into(),
                    max_runs: None,
                    end_date: None,
                },
            ),
            schedule(
                "bad-cron",
                ScheduleKind::Cron {
                    expression: "*/5 * * * *".into(),
                    max_runs: None,
                    end_date: None,
                },
            ),
        ];

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ConfigValidationError::DuplicateSchedule {
            name: "bad-cron".into()
        }));
    }

    #[test]
    fn test_metrics_listen_addr_only_checked_when_enabled() {
        let mut config = EngineConfig::default();
        config.metrics.listen_addr = "not-an-address".into();
        assert!(ConfigValidator::validate(&config).is_ok());

        config.metrics.enabled = true;
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(errors[0], ConfigValidationError::InvalidListenAddr { .. }));
    }

    #[test]
    fn test_format_validation_errors() {
        let output = format_validation_errors(&[
            ConfigValidationError::InvalidConcurrency,
            ConfigValidationError::EmptyLogFilter,
        ]);
        assert!(output.contains("1. Worker concurrency must be at least 1"));
        assert!(output.contains("2. Log filter must not be empty"));
    }
}
