use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use floodwatch::config::Config;
use floodwatch::controller::{
    ControllerHandle, DashboardState, PollSettings, PollStatus, PollingController,
};
use floodwatch::fetcher::FeatureClient;
use floodwatch::pipeline::summary::{alert_feed, summarize};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,floodwatch=debug,reqwest=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Flood watch service starting...");

    let config_path =
        std::env::var("FLOODWATCH_CONFIG").unwrap_or_else(|_| "config/config.yaml".to_string());
    let config = Config::load(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. the config file exists (or set FLOODWATCH_CONFIG)\n\
             2. All referenced environment variables are set\n\
             3. Create a .env file if needed",
            config_path,
            e
        )
    })?;
    info!("Configuration loaded, polling {}", config.source.base_url);

    let client = Arc::new(FeatureClient::from_config(&config.source)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (controller, handle) =
        PollingController::new(client, PollSettings::from(&config.polling), shutdown_rx);
    let status_rx = handle.subscribe();
    let controller_task = tokio::spawn(controller.run());

    let stale_after = config.polling.stale_after();
    let reporter = tokio::spawn(report_status(status_rx, stale_after));

    // Spawn signal handlers
    tokio::spawn(refresh_on_signal(handle.clone()));
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = controller_task.await {
        error!("Polling controller task failed: {}", e);
    }
    drop(handle);
    reporter.abort();

    info!("Flood watch service shutting down");
    Ok(())
}

/// Logs each status transition the way a dashboard would render it.
async fn report_status(mut rx: watch::Receiver<PollStatus>, stale_after: Duration) {
    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();
        match status.dashboard_state(chrono::Utc::now(), stale_after) {
            DashboardState::Loading => info!("Loading gauge data..."),
            DashboardState::Fresh { data, fetched_at } => {
                let summary = summarize(data.snapshots.values());
                info!(
                    "{} stations, {} active alerts (normal {}, alert {}, minor {}, major {}), \
                     mean level {:.2} m, fetched {}",
                    summary.total,
                    summary.active_alerts(),
                    summary.normal,
                    summary.alert,
                    summary.minor,
                    summary.major,
                    summary.average_level,
                    fetched_at.to_rfc3339()
                );
                for snapshot in alert_feed(data.snapshots.values())
                    .into_iter()
                    .take_while(|s| s.tier.is_alerting())
                {
                    warn!(
                        "{} [{}] {} / {}: {:.2} m",
                        snapshot.tier,
                        snapshot.id,
                        snapshot.basin_name,
                        snapshot.name,
                        snapshot.level
                    );
                }
            }
            DashboardState::Stale { fetched_at, error, .. } => warn!(
                "Showing data from {} (stale{})",
                fetched_at.to_rfc3339(),
                error.map(|e| format!(": {}", e)).unwrap_or_default()
            ),
            DashboardState::Unavailable { error } => {
                error!("Gauge data unavailable: {}. Send SIGUSR1 to retry.", error)
            }
        }
    }
}

#[cfg(unix)]
async fn refresh_on_signal(handle: ControllerHandle) {
    match signal::unix::signal(signal::unix::SignalKind::user_defined1()) {
        Ok(mut sig) => {
            while sig.recv().await.is_some() {
                info!("Received SIGUSR1, refresh {:?}", handle.refresh());
            }
        }
        Err(e) => {
            error!("Failed to install SIGUSR1 handler: {}", e);
        }
    }
}

#[cfg(not(unix))]
async fn refresh_on_signal(_handle: ControllerHandle) {}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
