//! Threshold alert rules with evaluation windows and cooldowns.
//!
//! A rule's metric value is taken over the health samples inside its
//! window (mean for gauges, increase for the failed-jobs counter). A
//! breached rule fires an [`Alert`] unless it fired within its cooldown, in
//! which case the suppression is counted. When the condition clears, the
//! rule's active alerts resolve on their own.

use crate::config::HealthThresholds;
use crate::error::{MonitorError, MonitorResult};
use crate::health::MetricsSnapshot;
use crate::metrics::MonitorMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_core::{AlertId, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a rule measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Pending jobs.
    QueueBacklog,
    /// Pending jobs / capacity.
    QueueUtilization,
    /// Recovery error rate.
    ErrorRate,
    /// Average execution time in milliseconds.
    ExecutionTime,
    /// Busy workers / pool size.
    WorkerSaturation,
    /// Jobs failed or timed out during the window.
    FailedJobs,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueBacklog => "queue_backlog",
            Self::QueueUtilization => "queue_utilization",
            Self::ErrorRate => "error_rate",
            Self::ExecutionTime => "execution_time",
            Self::WorkerSaturation => "worker_saturation",
            Self::FailedJobs => "failed_jobs",
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn gauge(self, s: &MetricsSnapshot) -> f64 {
        match self {
            Self::QueueBacklog => s.pending as f64,
            Self::QueueUtilization => s.utilization(),
            Self::ErrorRate => s.error_rate,
            Self::ExecutionTime => s.avg_execution_ms,
            Self::WorkerSaturation => s.saturation(),
            Self::FailedJobs => s.failed as f64,
        }
    }

    /// Value over the samples taken at or after `since`. `samples` must be
    /// in collection order.
    #[allow(clippy::cast_precision_loss)]
    pub fn window_value(self, samples: &[MetricsSnapshot], since: DateTime<Utc>) -> Option<f64> {
        let start = samples.iter().position(|s| s.collected_at >= since)?;
        let in_window = &samples[start..];
        let last = in_window.last()?;

        if self == Self::FailedJobs {
            let baseline = if start > 0 { &samples[start - 1] } else { &in_window[0] };
            return Some(last.failed.saturating_sub(baseline.failed) as f64);
        }
        let sum: f64 = in_window.iter().map(|s| self.gauge(s)).sum();
        Some(sum / in_window.len() as f64)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    Above,
    Below,
}

impl Comparison {
    pub fn breached(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Above => value > threshold,
            Self::Below => value < threshold,
        }
    }
}

/// A threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name, used as the alert type.
    pub name: String,
    pub metric: MetricKind,
    #[serde(default)]
    pub comparison: Comparison,
    pub threshold: f64,

    /// Evaluation window in seconds.
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Minimum seconds between two firings.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Message override.
    #[serde(default)]
    pub message: Option<String>,
}

fn default_window() -> u64 {
    300
}

fn default_cooldown() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl AlertRule {
    /// Rule firing when `metric` rises above `threshold`.
    pub fn new(name: impl Into<String>, metric: MetricKind, threshold: f64) -> Self {
        Self {
            name: name.into(),
            metric,
            comparison: Comparison::Above,
            threshold,
            window_secs: default_window(),
            cooldown_secs: default_cooldown(),
            severity: Severity::Medium,
            enabled: true,
            message: None,
        }
    }

    #[must_use]
    pub fn below(mut self) -> Self {
        self.comparison = Comparison::Below;
        self
    }

    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window_secs = window.as_secs();
        self
    }

    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs();
        self
    }

    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn window_duration(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.window_secs).unwrap_or(i64::MAX / 1000))
    }

    fn cooldown_duration(&self) -> ChronoDuration {
        ChronoDuration::seconds(i64::try_from(self.cooldown_secs).unwrap_or(i64::MAX / 1000))
    }

    fn describe(&self, value: f64) -> String {
        self.message.clone().unwrap_or_else(|| {
            let direction = match self.comparison {
                Comparison::Above => "above",
                Comparison::Below => "below",
            };
            format!(
                "{} is {value:.2}, {direction} threshold {}",
                self.metric, self.threshold
            )
        })
    }
}

/// Built-in rules derived from the health thresholds.
#[allow(clippy::cast_precision_loss)]
pub fn default_rules(thresholds: &HealthThresholds) -> Vec<AlertRule> {
    vec![
        AlertRule::new("queue_backlog", MetricKind::QueueBacklog, thresholds.backlog_warning as f64)
            .window(Duration::from_secs(60)),
        AlertRule::new(
            "queue_utilization",
            MetricKind::QueueUtilization,
            thresholds.utilization_warning,
        )
        .window(Duration::from_secs(60))
        .severity(Severity::High),
        AlertRule::new("high_error_rate", MetricKind::ErrorRate, thresholds.error_rate_warning)
            .severity(Severity::High),
        AlertRule::new(
            "slow_execution",
            MetricKind::ExecutionTime,
            thresholds.execution_warning_ms,
        ),
        AlertRule::new(
            "worker_saturation",
            MetricKind::WorkerSaturation,
            thresholds.saturation_warning,
        ),
        AlertRule::new("failed_jobs", MetricKind::FailedJobs, 10.0).severity(Severity::High),
    ]
}

/// A fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    /// Name of the rule that fired.
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    fn fire(rule: &AlertRule, value: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::new(),
            alert_type: rule.name.clone(),
            severity: rule.severity,
            message: rule.describe(value),
            value,
            threshold: rule.threshold,
            timestamp: now,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

/// Per-rule evaluation state.
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub rule: AlertRule,
    pub last_fired: Option<DateTime<Utc>>,
    pub fired: u64,
    /// Firings withheld by the cooldown.
    pub suppressed: u64,
}

/// Owns rules, active alerts and resolved history.
#[derive(Debug)]
pub struct AlertManager {
    rules: Vec<RuleStatus>,
    active: HashMap<AlertId, Alert>,
    history: VecDeque<Alert>,
    history_capacity: usize,
}

impl AlertManager {
    /// Empty manager keeping up to `history_capacity` resolved alerts.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            rules: Vec::new(),
            active: HashMap::new(),
            history: VecDeque::new(),
            history_capacity,
        }
    }

    /// Add a rule, replacing one with the same name.
    pub fn add_rule(&mut self, rule: AlertRule) {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.rule.name == rule.name) {
            existing.rule = rule;
            return;
        }
        self.rules.push(RuleStatus {
            rule,
            last_fired: None,
            fired: 0,
            suppressed: 0,
        });
    }

    /// Remove a rule. Its active alerts stay until resolved.
    pub fn remove_rule(&mut self, name: &str) -> MonitorResult<AlertRule> {
        let index = self
            .rules
            .iter()
            .position(|r| r.rule.name == name)
            .ok_or_else(|| MonitorError::RuleNotFound(name.to_string()))?;
        Ok(self.rules.remove(index).rule)
    }

    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) -> MonitorResult<()> {
        let status = self
            .rules
            .iter_mut()
            .find(|r| r.rule.name == name)
            .ok_or_else(|| MonitorError::RuleNotFound(name.to_string()))?;
        status.rule.enabled = enabled;
        Ok(())
    }

    pub fn rules(&self) -> Vec<RuleStatus> {
        self.rules.clone()
    }

    /// Evaluate every enabled rule and return the alerts fired.
    pub fn evaluate(&mut self, samples: &[MetricsSnapshot], now: DateTime<Utc>) -> Vec<Alert> {
        let mut fired = Vec::new();
        let mut cleared = Vec::new();

        for status in self.rules.iter_mut().filter(|r| r.rule.enabled) {
            let rule = &status.rule;
            let Some(value) = rule.metric.window_value(samples, now - rule.window_duration()) else {
                continue;
            };

            if !rule.comparison.breached(value, rule.threshold) {
                cleared.push(rule.name.clone());
                continue;
            }

            if let Some(last) = status.last_fired {
                if now - last < rule.cooldown_duration() {
                    status.suppressed += 1;
                    MonitorMetrics::alert_suppressed(&rule.name);
                    debug!(rule = %rule.name, value, "Alert suppressed by cooldown");
                    continue;
                }
            }

            let alert = Alert::fire(rule, value, now);
            warn!(
                alert_id = %alert.id,
                rule = %rule.name,
                severity = %alert.severity,
                value,
                threshold = rule.threshold,
                "Alert fired"
            );
            MonitorMetrics::alert_fired(&rule.name, alert.severity);
            status.last_fired = Some(now);
            status.fired += 1;
            self.active.insert(alert.id, alert.clone());
            fired.push(alert);
        }

        for rule in cleared {
            let ids: Vec<AlertId> = self
                .active
                .values()
                .filter(|a| a.alert_type == rule)
                .map(|a| a.id)
                .collect();
            for id in ids {
                if self.resolve(id, now).is_ok() {
                    info!(alert_id = %id, rule = %rule, "Alert auto-resolved");
                }
            }
        }

        fired
    }

    /// Unresolved alerts, most severe first, then newest first.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.values().cloned().collect();
        alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.timestamp.cmp(&a.timestamp)));
        alerts
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        self.active
            .get(&id)
            .or_else(|| self.history.iter().find(|a| a.id == id))
            .cloned()
    }

    /// Acknowledge an active alert.
    pub fn acknowledge(&mut self, id: AlertId, who: &str, now: DateTime<Utc>) -> MonitorResult<Alert> {
        let alert = self.active.get_mut(&id).ok_or(MonitorError::AlertNotFound(id))?;
        if alert.acknowledged {
            return Err(MonitorError::InvalidState(format!(
                "alert {id} already acknowledged by {}",
                alert.acknowledged_by.as_deref().unwrap_or("unknown")
            )));
        }
        alert.acknowledged = true;
        alert.acknowledged_by = Some(who.to_string());
        alert.acknowledged_at = Some(now);
        info!(alert_id = %id, by = who, "Alert acknowledged");
        Ok(alert.clone())
    }

    /// Resolve an active alert and move it to history.
    pub fn resolve(&mut self, id: AlertId, now: DateTime<Utc>) -> MonitorResult<Alert> {
        let mut alert = self.active.remove(&id).ok_or(MonitorError::AlertNotFound(id))?;
        alert.resolved = true;
        alert.resolved_at = Some(now);
        self.history.push_back(alert.clone());
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
        Ok(alert)
    }

    /// Resolved alerts, newest first.
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample(at: DateTime<Utc>, pending: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            collected_at: at,
            pending,
            ..MetricsSnapshot::default()
        }
    }

    fn backlog_rule() -> AlertRule {
        AlertRule::new("backlog", MetricKind::QueueBacklog, 100.0)
            .window(Duration::from_secs(60))
            .cooldown(Duration::from_secs(300))
    }

    #[test]
    fn test_window_mean_ignores_old_samples() {
        let samples = vec![
            sample(t0(), 1_000),
            sample(t0() + ChronoDuration::seconds(120), 100),
            sample(t0() + ChronoDuration::seconds(150), 300),
        ];
        let since = t0() + ChronoDuration::seconds(100);
        assert_eq!(MetricKind::QueueBacklog.window_value(&samples, since), Some(200.0));
        assert_eq!(
            MetricKind::QueueBacklog.window_value(&samples, t0() + ChronoDuration::seconds(200)),
            None
        );
    }

    #[test]
    fn test_failed_jobs_uses_increase() {
        let mut samples = Vec::new();
        for (i, failed) in [5u64, 7, 12].into_iter().enumerate() {
            samples.push(MetricsSnapshot {
                collected_at: t0() + ChronoDuration::seconds(i as i64 * 60),
                failed,
                ..MetricsSnapshot::default()
            });
        }
        let since = t0() + ChronoDuration::seconds(30);
        assert_eq!(MetricKind::FailedJobs.window_value(&samples, since), Some(7.0));
    }

    #[test]
    fn test_cooldown_limits_firing() {
        let mut manager = AlertManager::new(10);
        manager.add_rule(backlog_rule());

        let mut samples = Vec::new();
        let mut fired = 0;
        // Breached every 30s for 10 minutes.
        for step in 0..=20 {
            let now = t0() + ChronoDuration::seconds(step * 30);
            samples.push(sample(now, 500));
            fired += manager.evaluate(&samples, now).len();
        }

        // t=0, t=300, t=600
        assert_eq!(fired, 3);
        let status = &manager.rules()[0];
        assert_eq!(status.fired, 3);
        assert_eq!(status.suppressed, 18);
    }

    #[test]
    fn test_auto_resolve_when_condition_clears() {
        let mut manager = AlertManager::new(10);
        manager.add_rule(backlog_rule());

        let mut samples = vec![sample(t0(), 500)];
        let fired = manager.evaluate(&samples, t0());
        assert_eq!(fired.len(), 1);
        assert_eq!(manager.active_alerts().len(), 1);

        let later = t0() + ChronoDuration::seconds(120);
        samples.push(sample(later, 0));
        assert!(manager.evaluate(&samples, later).is_empty());
        assert!(manager.active_alerts().is_empty());

        let resolved = manager.history(10);
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved);
        assert_eq!(resolved[0].resolved_at, Some(later));
    }

    #[test]
    fn test_acknowledge_and_resolve() {
        let mut manager = AlertManager::new(10);
        manager.add_rule(backlog_rule().severity(Severity::Critical));
        let alert = manager.evaluate(&[sample(t0(), 500)], t0()).remove(0);
        assert_eq!(alert.severity, Severity::Critical);

        let acked = manager.acknowledge(alert.id, "oncall", t0()).unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("oncall"));
        assert!(manager.acknowledge(alert.id, "oncall", t0()).is_err());

        manager.resolve(alert.id, t0()).unwrap();
        assert!(matches!(
            manager.resolve(alert.id, t0()),
            Err(MonitorError::AlertNotFound(_))
        ));
        assert!(manager.get(alert.id).unwrap().resolved);
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let mut manager = AlertManager::new(10);
        manager.add_rule(backlog_rule());
        manager.set_rule_enabled("backlog", false).unwrap();
        assert!(manager.evaluate(&[sample(t0(), 500)], t0()).is_empty());
        assert!(manager.set_rule_enabled("missing", true).is_err());
    }

    #[test]
    fn test_below_comparison() {
        let rule = AlertRule::new("idle", MetricKind::WorkerSaturation, 0.1).below();
        assert!(rule.comparison.breached(0.05, rule.threshold));
        assert!(!rule.comparison.breached(0.5, rule.threshold));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager = AlertManager::new(2);
        manager.add_rule(backlog_rule().cooldown(Duration::ZERO));
        for step in 0..4 {
            let now = t0() + ChronoDuration::seconds(step);
            let alert = manager.evaluate(&[sample(now, 500)], now).remove(0);
            manager.resolve(alert.id, now).unwrap();
        }
        assert_eq!(manager.history(10).len(), 2);
    }

    #[test]
    fn test_default_rules_deserialize_round() {
        let rules = default_rules(&HealthThresholds::default());
        assert_eq!(rules.len(), 6);
        let rule: AlertRule = serde_json::from_str(
            r#"{"name": "backlog", "metric": "queue_backlog", "threshold": 50}"#,
        )
        .unwrap();
        assert_eq!(rule.cooldown_secs, 300);
        assert_eq!(rule.comparison, Comparison::Above);
    }
}
