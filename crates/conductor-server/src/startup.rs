//! Server startup utilities.

use crate::engine::Engine;
use conductor_config::{EngineConfig, MetricsConfig};
use conductor_resilience::ExecutionError;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};

/// Prints the startup banner.
pub fn print_banner() {
    info!(r#"
   ______                __           __
  / ____/___  ____  ____/ /_  _______/ /_____  _____
 / /   / __ \/ __ \/ __  / / / / ___/ __/ __ \/ ___/
/ /___/ /_/ / / / / /_/ / /_/ / /__/ /_/ /_/ / /
\____/\____/_/ /_/\__,_/\__,_/\___/\__/\____/_/
    "#);
}

/// Prints engine startup information.
pub fn print_startup_info(config: &EngineConfig) {
    let separator = "=".repeat(60);
    info!("{}", separator);
    info!("Environment:  {}", config.app.environment);
    info!("Workers:      {}", config.worker.concurrency);
    info!("Queue size:   {}", config.queue.max_queue_size);
    info!("Schedules:    {}", config.schedules.len());
    if config.metrics.enabled {
        info!("Metrics:      http://{}/metrics", config.metrics.listen_addr);
    }
    info!("{}", separator);
}

/// Installs the Prometheus recorder and registers metric descriptions.
///
/// Does nothing when metrics are disabled. Must run inside a tokio runtime.
pub fn install_metrics_exporter(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config.listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    conductor_jobs::register_metrics();
    conductor_monitor::register_metrics();

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Registers the handlers every deployment gets: `log` writes the payload
/// to the log and returns it, `noop` returns null.
pub fn register_builtin_handlers(engine: &Engine) {
    engine.register_fn("log", |payload: Value, ctx| async move {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ExecutionError::validation("log payload requires a string 'message'"))?;
        info!(job_id = %ctx.job_id, job = %ctx.name, "{}", message);
        Ok(json!({ "logged": message }))
    });

    engine.register_fn("noop", |_payload: Value, _ctx| async move { Ok(Value::Null) });
}

/// Completes on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::SystemClock;
    use conductor_jobs::{JobStatus, NewJob};
    use std::time::Duration;

    #[test]
    fn test_print_banner_does_not_panic() {
        print_banner();
        print_startup_info(&EngineConfig::default());
    }

    #[test]
    fn test_disabled_exporter_is_noop() {
        assert!(install_metrics_exporter(&MetricsConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_builtin_handlers() {
        let mut config = EngineConfig::default();
        config.worker.concurrency = 2;
        config.worker.poll_interval_ms = 10;
        let engine = Engine::new(config, SystemClock::shared()).unwrap();
        register_builtin_handlers(&engine);
        engine.start().unwrap();

        let logged = engine
            .submit_job(NewJob::new("log").payload(json!({"message": "hello"})).max_retries(0))
            .unwrap();
        let noop = engine.submit_job(NewJob::new("noop")).unwrap();
        let invalid = engine
            .submit_job(NewJob::new("log").payload(json!({"text": 1})).max_retries(0))
            .unwrap();

        for _ in 0..100 {
            let done = [logged, noop, invalid]
                .iter()
                .all(|id| engine.get_job_status(*id).is_some_and(|s| s.is_terminal()));
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(engine.get_job_status(logged), Some(JobStatus::Completed));
        assert_eq!(engine.get_job(logged).unwrap().result, Some(json!({"logged": "hello"})));
        assert_eq!(engine.get_job_status(noop), Some(JobStatus::Completed));
        assert_eq!(engine.get_job_status(invalid), Some(JobStatus::Failed));

        engine.stop().await;
    }
}
