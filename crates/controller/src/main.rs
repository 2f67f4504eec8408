//! AegisOps remediation controller
//!
//! Runs next to the supervised deployment: learns a baseline of its
//! request rate, latency and memory, then scales or restarts it when an
//! anomaly shows up outside the cooldown window.

use anyhow::{Context, Result};
use controller_lib::{
    collector::SampleCollector,
    health::HealthRegistry,
    metrics_source::PrometheusClient,
    notifier::WebhookNotifier,
    observability::ControllerMetrics,
    remediation::RemediationDispatcher,
    Controller, SystemClock,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal, sync::broadcast};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting aegis-controller");

    // Load configuration
    let config = config::ControllerConfig::load()?;
    info!(
        target_workload = %config.target(),
        metrics_url = %config.metrics_url,
        baseline_policy = %config.baseline_policy,
        control_plane = %config.control_plane,
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    let metrics = ControllerMetrics::new();

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let listener = TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .with_context(|| format!("failed to bind API port {}", config.api_port))?;
    tokio::spawn(async move {
        if let Err(e) = api::serve(listener, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let metrics_source = PrometheusClient::new(&config.metrics_url, config.query_timeout())
        .context("invalid metrics_url")?
        .with_health(health_registry.clone());
    let collector = SampleCollector::new(Arc::new(metrics_source), config.queries());

    let dispatcher =
        RemediationDispatcher::new(config.control_plane()).with_timeout(config.dispatch_timeout());

    let notifier = WebhookNotifier::new(config.webhook(), config.notify_timeout())
        .context("failed to build webhook client")?
        .with_health(health_registry.clone());

    let controller = Controller::new(
        config.target(),
        Arc::new(collector),
        Arc::new(config.fitter()?),
        dispatcher,
        Arc::new(notifier),
        Arc::new(SystemClock),
        config.baseline()?,
    )
    .with_detector_config(config.detector())
    .with_action(config.action())
    .with_health(health_registry);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    controller
        .run(shutdown_rx)
        .await
        .context("controller could not establish a baseline")?;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
