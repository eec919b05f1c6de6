//! Prometheus metrics for health checks, alerts and notifications.

use crate::health::HealthLevel;
use conductor_core::Severity;
use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric names for the monitor.
pub mod names {
    /// Overall health (0 healthy, 1 warning, 2 critical).
    pub const HEALTH_STATUS: &str = "conductor_monitor_health_status";
    /// Per-component health.
    pub const COMPONENT_HEALTH: &str = "conductor_monitor_component_health";
    /// Health checks run.
    pub const HEALTH_CHECKS_TOTAL: &str = "conductor_monitor_health_checks_total";
    /// Alerts fired.
    pub const ALERTS_FIRED_TOTAL: &str = "conductor_monitor_alerts_fired_total";
    /// Alerts withheld by a cooldown.
    pub const ALERTS_SUPPRESSED_TOTAL: &str = "conductor_monitor_alerts_suppressed_total";
    /// Unresolved alerts.
    pub const ALERTS_ACTIVE: &str = "conductor_monitor_alerts_active";
    /// Notification deliveries.
    pub const NOTIFICATIONS_TOTAL: &str = "conductor_monitor_notifications_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_gauge!(names::HEALTH_STATUS, "Overall health: 0 healthy, 1 warning, 2 critical");
    describe_gauge!(names::COMPONENT_HEALTH, "Health level per component");
    describe_counter!(names::HEALTH_CHECKS_TOTAL, "Total number of health checks");
    describe_counter!(names::ALERTS_FIRED_TOTAL, "Total number of alerts fired");
    describe_counter!(
        names::ALERTS_SUPPRESSED_TOTAL,
        "Total number of alert firings suppressed by cooldown"
    );
    describe_gauge!(names::ALERTS_ACTIVE, "Number of unresolved alerts");
    describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Total number of alert notifications by channel and outcome"
    );
}

/// Monitor metrics recorder.
pub struct MonitorMetrics;

impl MonitorMetrics {
    /// Record a health check result.
    pub fn health_checked(overall: HealthLevel, components: &[(&str, HealthLevel)]) {
        counter!(names::HEALTH_CHECKS_TOTAL).increment(1);
        gauge!(names::HEALTH_STATUS).set(overall.as_gauge());
        for (name, level) in components {
            gauge!(names::COMPONENT_HEALTH, "component" => (*name).to_string()).set(level.as_gauge());
        }
    }

    /// Record an alert fired.
    pub fn alert_fired(rule: &str, severity: Severity) {
        counter!(
            names::ALERTS_FIRED_TOTAL,
            "rule" => rule.to_string(),
            "severity" => severity.as_str()
        )
        .increment(1);
    }

    /// Record a suppressed firing.
    pub fn alert_suppressed(rule: &str) {
        counter!(names::ALERTS_SUPPRESSED_TOTAL, "rule" => rule.to_string()).increment(1);
    }

    /// Update the active alert gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_active(count: usize) {
        gauge!(names::ALERTS_ACTIVE).set(count as f64);
    }

    /// Record a notification attempt.
    pub fn notification(channel: &str, delivered: bool) {
        counter!(
            names::NOTIFICATIONS_TOTAL,
            "channel" => channel.to_string(),
            "outcome" => if delivered { "delivered" } else { "failed" }
        )
        .increment(1);
    }
}
