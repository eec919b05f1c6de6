//! Alert delivery to pluggable channels.

use crate::alerts::Alert;
use crate::error::MonitorResult;
use crate::metrics::MonitorMetrics;
use async_trait::async_trait;
use conductor_core::Severity;
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A destination for fired alerts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Deliver one alert.
    async fn send(&self, alert: &Alert) -> MonitorResult<()>;
}

/// Writes alerts to the tracing log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> MonitorResult<()> {
        match alert.severity {
            Severity::Critical | Severity::High => error!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                "{}",
                alert.message
            ),
            Severity::Medium => warn!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                "{}",
                alert.message
            ),
            Severity::Low => info!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Fans alerts out to every registered channel.
#[derive(Default)]
pub struct Notifier {
    channels: RwLock<Vec<Arc<dyn AlertChannel>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier with the log channel installed.
    pub fn with_log_channel() -> Self {
        let notifier = Self::new();
        notifier.add_channel(Arc::new(LogChannel));
        notifier
    }

    pub fn add_channel(&self, channel: Arc<dyn AlertChannel>) {
        self.channels.write().push(channel);
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.read().iter().map(|c| c.name()).collect()
    }

    /// Deliver to all channels concurrently. Returns how many succeeded;
    /// failures are logged and never propagate.
    pub async fn notify(&self, alert: &Alert) -> usize {
        let channels: Vec<Arc<dyn AlertChannel>> = self.channels.read().clone();
        let results = join_all(channels.iter().map(|channel| channel.send(alert))).await;

        let mut delivered = 0;
        for (channel, result) in channels.iter().zip(results) {
            match result {
                Ok(()) => {
                    delivered += 1;
                    MonitorMetrics::notification(channel.name(), true);
                }
                Err(e) => {
                    warn!(channel = channel.name(), alert_id = %alert.id, error = %e, "Alert delivery failed");
                    MonitorMetrics::notification(channel.name(), false);
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("channels", &self.channel_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use chrono::Utc;
    use conductor_core::AlertId;

    fn alert() -> Alert {
        Alert {
            id: AlertId::new(),
            alert_type: "backlog".into(),
            severity: Severity::High,
            message: "queue_backlog is 500.00, above threshold 100".into(),
            value: 500.0,
            threshold: 100.0,
            timestamp: Utc::now(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_fan_out_counts_deliveries() {
        let mut ok = MockAlertChannel::new();
        ok.expect_name().return_const("ok");
        ok.expect_send()
            .withf(|a: &Alert| a.alert_type == "backlog")
            .times(1)
            .returning(|_| Ok(()));

        let mut broken = MockAlertChannel::new();
        broken.expect_name().return_const("broken");
        broken
            .expect_send()
            .times(1)
            .returning(|_| Err(MonitorError::channel("broken", "unreachable")));

        let notifier = Notifier::with_log_channel();
        notifier.add_channel(Arc::new(ok));
        notifier.add_channel(Arc::new(broken));

        assert_eq!(notifier.notify(&alert()).await, 2);
        assert_eq!(notifier.channel_names(), vec!["log", "ok", "broken"]);
    }

    #[tokio::test]
    async fn test_no_channels() {
        assert_eq!(Notifier::new().notify(&alert()).await, 0);
    }
}
