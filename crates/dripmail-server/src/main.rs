//! Dripmail - Campaign server entry point

use anyhow::Result;
use dripmail_common::config::{Config, LoggingConfig};
use dripmail_core::DripEngine;
use dripmail_storage::Repositories;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting dripmail server...");

    // Initialize storage
    let repos = Repositories::connect(&config.database).await?;
    info!(backend = %config.database.backend, "Storage ready");

    // Re-arm schedules persisted by the previous run
    let engine = Arc::new(DripEngine::from_config(repos.clone(), &config.scheduler));
    let recovered = engine.recover().await?;
    info!(
        rearmed = recovered.rearmed,
        missed = recovered.missed,
        failed = recovered.failed,
        "Schedule recovery completed"
    );

    // Start API server
    let state = dripmail_api::AppState::new(repos, engine.clone());
    let app = dripmail_api::create_router(state, &config.api);
    let addr = format!("{}:{}", config.api.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persisted schedules stay in place for the next start
    let cancelled = engine.shutdown().await;
    info!(cancelled, "Dripmail server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "text" {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    }
}
