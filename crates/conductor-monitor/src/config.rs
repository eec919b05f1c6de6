//! Monitor configuration.

use crate::alerts::AlertRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Run the health and alert cycles.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Health check interval in milliseconds.
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,

    /// Alert evaluation interval in milliseconds.
    #[serde(default = "default_alert_interval")]
    pub alert_interval_ms: u64,

    /// Health samples kept for windowed rule evaluation.
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,

    /// Resolved alerts kept for history queries.
    #[serde(default = "default_alert_history")]
    pub alert_history_capacity: usize,

    /// Install the built-in rules before `rules`.
    #[serde(default = "default_true")]
    pub default_rules: bool,

    /// Additional alert rules.
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    /// Health thresholds.
    #[serde(default)]
    pub thresholds: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_interval_ms: default_health_interval(),
            alert_interval_ms: default_alert_interval(),
            sample_capacity: default_sample_capacity(),
            alert_history_capacity: default_alert_history(),
            default_rules: true,
            rules: Vec::new(),
            thresholds: HealthThresholds::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_health_interval() -> u64 {
    30_000
}

fn default_alert_interval() -> u64 {
    60_000
}

fn default_sample_capacity() -> usize {
    360
}

fn default_alert_history() -> usize {
    500
}

impl MonitorConfig {
    /// Get health interval as Duration.
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Get alert interval as Duration.
    pub fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }
}

/// Warning/critical bounds used by the health rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    #[serde(default = "default_backlog_warning")]
    pub backlog_warning: u64,
    #[serde(default = "default_backlog_critical")]
    pub backlog_critical: u64,

    /// Pending / max queue size.
    #[serde(default = "default_utilization_warning")]
    pub utilization_warning: f64,
    #[serde(default = "default_utilization_critical")]
    pub utilization_critical: f64,

    /// Busy / total workers.
    #[serde(default = "default_saturation_warning")]
    pub saturation_warning: f64,
    #[serde(default = "default_saturation_critical")]
    pub saturation_critical: f64,

    #[serde(default = "default_execution_warning")]
    pub execution_warning_ms: f64,
    #[serde(default = "default_execution_critical")]
    pub execution_critical_ms: f64,

    #[serde(default = "default_error_rate_warning")]
    pub error_rate_warning: f64,
    #[serde(default = "default_error_rate_critical")]
    pub error_rate_critical: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            backlog_warning: default_backlog_warning(),
            backlog_critical: default_backlog_critical(),
            utilization_warning: default_utilization_warning(),
            utilization_critical: default_utilization_critical(),
            saturation_warning: default_saturation_warning(),
            saturation_critical: default_saturation_critical(),
            execution_warning_ms: default_execution_warning(),
            execution_critical_ms: default_execution_critical(),
            error_rate_warning: default_error_rate_warning(),
            error_rate_critical: default_error_rate_critical(),
        }
    }
}

fn default_backlog_warning() -> u64 {
    1_000
}

fn default_backlog_critical() -> u64 {
    5_000
}

fn default_utilization_warning() -> f64 {
    0.8
}

fn default_utilization_critical() -> f64 {
    0.95
}

fn default_saturation_warning() -> f64 {
    0.9
}

fn default_saturation_critical() -> f64 {
    1.0
}

fn default_execution_warning() -> f64 {
    5_000.0
}

fn default_execution_critical() -> f64 {
    30_000.0
}

fn default_error_rate_warning() -> f64 {
    0.05
}

fn default_error_rate_critical() -> f64 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enabled);
        assert!(config.default_rules);
        assert_eq!(config.health_interval(), Duration::from_secs(30));
        assert_eq!(config.alert_interval(), Duration::from_secs(60));
        assert_eq!(config.thresholds, HealthThresholds::default());
    }

    #[test]
    fn test_partial_thresholds() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"thresholds": {"backlog_warning": 10}}"#).unwrap();
        assert_eq!(config.thresholds.backlog_warning, 10);
        assert_eq!(config.thresholds.backlog_critical, 5_000);
    }
}
