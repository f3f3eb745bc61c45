//! Rotatify - Entry Point
//!
//! Loads proxies from the environment, fetches the target URL on every
//! rotation tick and logs what came back, until Ctrl+C or SIGTERM.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rotatify::{ClientConfig, Config, RotatingClient, TickOutcome};

#[tokio::main]
async fn main() -> rotatify::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rotatify={}", config.log.level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Rotatify");

    let client = Arc::new(RotatingClient::with_config(ClientConfig::from(&config)));
    client.set_rotate_interval(config.rotation.interval)?;
    client.update_proxies(&config.rotation.proxies)?;
    if client.proxy_count() == 0 {
        warn!("No proxies configured (ROTATIFY_PROXIES); requests go direct");
    }

    // Log tick reports
    let mut reports = client.subscribe_reports();
    let report_task = tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => {
                    match &report.outcome {
                        TickOutcome::Completed { output } => {
                            info!(tick = report.tick, transport = %report.transport, "{}", output.trim());
                        }
                        TickOutcome::Failed { error } => {
                            warn!(tick = report.tick, transport = %report.transport, "Fetch failed: {}", error);
                        }
                        TickOutcome::TimedOut => {
                            warn!(tick = report.tick, transport = %report.transport, "Fetch timed out");
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&report) {
                        debug!(report = %json, "Tick report");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} tick reports", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Start rotation
    let rotation_task = tokio::spawn({
        let client = client.clone();
        let target = config.rotation.target_url.clone();
        async move {
            if let Err(e) = client.start_rotate_proxies(&target).await {
                error!("Proxy rotation error: {}", e);
            }
        }
    });

    info!(
        "Rotating {} proxies every {:?}, target {}",
        client.proxy_count(),
        config.rotation.interval,
        config.rotation.target_url
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    client.stop_rotate_proxies();
    let _ = rotation_task.await;
    report_task.abort();

    info!("Rotatify stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
