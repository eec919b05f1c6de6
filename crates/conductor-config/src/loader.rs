//! Configuration loader with layered sources.

use crate::validation::{format_validation_errors, ConfigValidator};
use crate::EngineConfig;
use conductor_core::{ConductorError, ConductorResult};
use config::{Config, ConfigError, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CONDUCTOR";

/// Environment variable naming the config environment.
pub const ENVIRONMENT_VAR: &str = "CONDUCTOR_ENVIRONMENT";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<EngineConfig>>,
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `CONDUCTOR_` prefix and `__` separator
    pub fn new(config_dir: impl Into<PathBuf>) -> ConductorResult<Self> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> ConductorResult<Self> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk. The previous configuration is
    /// kept if the new one fails to load or validate.
    pub async fn reload(&self) -> ConductorResult<()> {
        let new_config = Self::load_config(&self.config_dir)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads and validates configuration from `config_dir`.
    pub fn load_config(config_dir: &Path) -> ConductorResult<EngineConfig> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        info!(environment = %environment, config_dir = %config_dir.display(), "Loading configuration");

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = config_dir.join(format!("{name}.toml"));
            if path.exists() {
                debug!(path = %path.display(), "Loading config file");
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error_to_conductor_error)?;

        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Validates the configuration, reporting every problem at once.
    fn validate_config(config: &EngineConfig) -> ConductorResult<()> {
        if config.app.is_production() && config.telemetry.log_filter.contains("debug") {
            warn!("Debug logging enabled in production");
        }

        ConfigValidator::validate(config)
            .map_err(|errors| ConductorError::Configuration(format_validation_errors(&errors)))
    }

    /// Gets a specific configuration value by dotted key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_conductor_error(err: ConfigError) -> ConductorError {
    ConductorError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent")).unwrap();
        let config = loader.get().await;
        assert_eq!(config.app.name, "conductor");
        assert_eq!(config.queue.max_queue_size, 10_000);
    }

    #[tokio::test]
    async fn test_file_layers_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[queue]
max_queue_size = 200
default_timeout_ms = 5000

[[schedules]]
name = "heartbeat"
type = "recurring"
interval_ms = 60000

[schedules.job]
job_type = "log"
payload = { message = "alive" }
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[queue]\nmax_queue_size = 300\n",
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.queue.max_queue_size, 300);
        assert_eq!(config.queue.default_timeout_ms, 5000);
        assert_eq!(config.schedules.len(), 1);
        assert_eq!(config.schedules[0].job.job_type, "log");

        assert_eq!(loader.get_value::<u64>("queue.default_timeout_ms").await, Some(5000));
        assert_eq!(loader.get_value::<u64>("queue.missing").await, None);
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[worker]\nconcurrency = 0\n").unwrap();

        let err = ConfigLoader::new(dir.path()).err().unwrap();
        assert!(err.to_string().contains("Worker concurrency"));
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, "[scheduler]\ntick_interval_ms = 500\n").unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();
        assert_eq!(loader.get().await.scheduler.tick_interval_ms, 500);

        fs::write(&path, "[scheduler]\ntick_interval_ms = 250\n").unwrap();
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.scheduler.tick_interval_ms, 250);
    }
}
