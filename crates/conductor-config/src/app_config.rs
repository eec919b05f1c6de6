//! Engine configuration structures.

use conductor_core::TelemetryConfig;
use conductor_jobs::{QueueConfig, ScheduleDefinition, SchedulerConfig, WorkerConfig};
use conductor_monitor::MonitorConfig;
use conductor_resilience::RecoverySettings;
use serde::{Deserialize, Serialize};

/// Root engine configuration. Every section has defaults, so an empty
/// source yields a runnable engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Application metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Job queue.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Scheduler tick loop.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Health checks and alerting.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Recovery history bounds and rules.
    #[serde(default)]
    pub recovery: RecoverySettings,

    /// Entries registered at boot.
    #[serde(default)]
    pub schedules: Vec<ScheduleDefinition>,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Environment (development, staging, production).
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_environment(),
        }
    }
}

fn default_app_name() -> String {
    "conductor".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl AppMetadata {
    /// Returns true if running in production.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address for the scrape endpoint.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:9000".to_string()
}
