//! # Conductor Server
//!
//! Loads configuration, builds the engine, runs it until Ctrl+C or SIGTERM,
//! then stops it gracefully.

use anyhow::Context;
use conductor_config::ConfigLoader;
use conductor_core::{init_tracing, SystemClock};
use conductor_server::startup::{
    install_metrics_exporter, print_banner, print_startup_info, register_builtin_handlers, shutdown_signal,
};
use conductor_server::Engine;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // tracing may not be up if configuration failed
        eprintln!("Application error: {e:#}");
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let loader = ConfigLoader::from_default_location().context("Failed to load configuration")?;
    let config = loader.get().await;

    init_tracing(&config.telemetry)?;
    print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    install_metrics_exporter(&config.metrics).context("Failed to install metrics exporter")?;

    let engine = Engine::new(config.clone(), SystemClock::shared()).context("Failed to build engine")?;
    register_builtin_handlers(&engine);
    engine.start()?;
    print_startup_info(&config);

    shutdown_signal().await;

    engine.stop().await;
    info!("Server shutdown complete");
    Ok(())
}
