//! The monitor: periodic health checks and alert evaluation over a
//! [`MetricsSource`].

use crate::alerts::{default_rules, Alert, AlertManager, AlertRule, RuleStatus};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::health::{HealthLevel, MetricsSnapshot, MetricsSource, SystemHealth};
use crate::metrics::MonitorMetrics;
use crate::notifier::{AlertChannel, Notifier};
use crate::progress::ProgressRegistry;
use conductor_core::{AlertId, SharedClock};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Health checks, alerting and progress tracking for one engine.
pub struct Monitor {
    source: Arc<dyn MetricsSource>,
    config: MonitorConfig,
    clock: SharedClock,
    samples: Mutex<VecDeque<MetricsSnapshot>>,
    last_health: RwLock<Option<SystemHealth>>,
    alerts: Mutex<AlertManager>,
    notifier: Notifier,
    progress: ProgressRegistry,
    /// Holds a stop request until both cycles consume it.
    shutdown: watch::Sender<bool>,
    running: AtomicBool,
}

impl Monitor {
    /// Create a monitor with the log channel and the configured rules.
    pub fn new(source: Arc<dyn MetricsSource>, config: MonitorConfig, clock: SharedClock) -> Self {
        let mut alerts = AlertManager::new(config.alert_history_capacity);
        if config.default_rules {
            for rule in default_rules(&config.thresholds) {
                alerts.add_rule(rule);
            }
        }
        for rule in &config.rules {
            alerts.add_rule(rule.clone());
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            source,
            progress: ProgressRegistry::new(clock.clone()),
            config,
            clock,
            samples: Mutex::new(VecDeque::new()),
            last_health: RwLock::new(None),
            alerts: Mutex::new(alerts),
            notifier: Notifier::with_log_channel(),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Register a notification channel.
    pub fn add_channel(&self, channel: Arc<dyn AlertChannel>) {
        self.notifier.add_channel(channel);
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Progress trackers.
    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    /// Take a sample, evaluate component health and record it.
    pub fn check_health(&self) -> SystemHealth {
        let mut snapshot = self.source.snapshot();
        snapshot.collected_at = self.clock.now();
        let health = SystemHealth::evaluate(&snapshot, &self.config.thresholds);

        {
            let mut samples = self.samples.lock();
            samples.push_back(snapshot);
            while samples.len() > self.config.sample_capacity.max(1) {
                samples.pop_front();
            }
        }

        MonitorMetrics::health_checked(
            health.status,
            &health.components().map(|c| (c.name.as_str(), c.level)),
        );
        if !health.is_healthy() {
            for component in health.components().iter().filter(|c| c.level != HealthLevel::Healthy) {
                warn!(
                    component = %component.name,
                    level = %component.level,
                    "{}",
                    component.message
                );
            }
        }
        *self.last_health.write() = Some(health.clone());
        health
    }

    /// Latest health, checking now if none has been recorded.
    pub fn system_health(&self) -> SystemHealth {
        if let Some(health) = self.last_health.read().clone() {
            return health;
        }
        self.check_health()
    }

    /// Evaluate rules over the recorded samples and deliver fired alerts.
    pub async fn evaluate_alerts(&self) -> Vec<Alert> {
        let now = self.clock.now();
        let samples: Vec<MetricsSnapshot> = self.samples.lock().iter().cloned().collect();
        let (fired, active) = {
            let mut alerts = self.alerts.lock();
            let fired = alerts.evaluate(&samples, now);
            (fired, alerts.active_count())
        };
        MonitorMetrics::update_active(active);

        for alert in &fired {
            self.notifier.notify(alert).await;
        }
        fired
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().active_alerts()
    }

    pub fn alert(&self, id: AlertId) -> Option<Alert> {
        self.alerts.lock().get(id)
    }

    pub fn acknowledge_alert(&self, id: AlertId, who: &str) -> MonitorResult<Alert> {
        self.alerts.lock().acknowledge(id, who, self.clock.now())
    }

    pub fn resolve_alert(&self, id: AlertId) -> MonitorResult<Alert> {
        let mut alerts = self.alerts.lock();
        let alert = alerts.resolve(id, self.clock.now())?;
        MonitorMetrics::update_active(alerts.active_count());
        info!(alert_id = %id, "Alert resolved");
        Ok(alert)
    }

    /// Resolved alerts, newest first.
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.alerts.lock().history(limit)
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.alerts.lock().add_rule(rule);
    }

    pub fn remove_rule(&self, name: &str) -> MonitorResult<AlertRule> {
        self.alerts.lock().remove_rule(name)
    }

    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> MonitorResult<()> {
        self.alerts.lock().set_rule_enabled(name, enabled)
    }

    pub fn rules(&self) -> Vec<RuleStatus> {
        self.alerts.lock().rules()
    }

    /// Number of samples held.
    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run both cycles until [`Monitor::stop`] is called.
    ///
    /// Health checks and alert evaluation tick on separate loops, so slow
    /// alert delivery never holds back sampling. A stop requested before
    /// the cycles are first polled ends them on entry.
    pub async fn start(&self) -> MonitorResult<()> {
        if !self.config.enabled {
            info!("Monitor disabled by configuration");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::InvalidState("Monitor already running".to_string()));
        }

        info!(
            health_interval_ms = self.config.health_interval_ms,
            alert_interval_ms = self.config.alert_interval_ms,
            "Starting monitor"
        );

        tokio::join!(self.run_health_cycle(), self.run_alert_cycle());

        self.shutdown.send_replace(false);
        self.running.store(false, Ordering::SeqCst);
        info!("Monitor stopped");
        Ok(())
    }

    async fn run_health_cycle(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut health_interval = interval(self.config.health_interval());

        loop {
            tokio::select! {
                biased;

                () = stop_requested(&mut shutdown_rx) => {
                    debug!("Health cycle received shutdown signal");
                    break;
                }

                _ = health_interval.tick() => {
                    let health = self.check_health();
                    debug!(status = %health.status, "Health check");
                }
            }
        }
    }

    async fn run_alert_cycle(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut alert_interval = interval(self.config.alert_interval());

        loop {
            tokio::select! {
                biased;

                () = stop_requested(&mut shutdown_rx) => {
                    debug!("Alert cycle received shutdown signal");
                    break;
                }

                // Delivery in flight is dropped on stop; fired alerts stay active.
                fired = async {
                    alert_interval.tick().await;
                    self.evaluate_alerts().await
                } => {
                    if !fired.is_empty() {
                        debug!(fired = fired.len(), "Alert evaluation");
                    }
                }
            }
        }
    }

    /// Stop both cycles.
    pub fn stop(&self) {
        info!("Stopping monitor...");
        self.shutdown.send_replace(true);
    }
}

/// Resolves once a stop has been requested on `rx`.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &self.is_running())
            .field("samples", &self.sample_count())
            .finish_non_exhaustive()
    }
}
