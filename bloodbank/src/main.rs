//! Blood bank service.
//!
//! Runs the engine over in-memory stores with the periodic expiry sweeper and
//! an optional Prometheus endpoint, until Ctrl+C or SIGTERM.

use bloodbank::donors::InMemoryDonorDirectory;
use bloodbank::{
    BloodBank, BloodBankOptions, Config, InMemoryInventoryStore, LowStockThresholds,
    TracingNotifier,
};
use bloodbank_core::environment::SystemClock;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bloodbank=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting blood bank service");

    let config = Config::from_env();
    info!(
        sweep_enabled = config.sweeper.enabled,
        sweep_interval_secs = config.sweeper.interval_secs,
        metrics_enabled = config.observability.metrics_enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let address: SocketAddr = config.metrics_address().parse()?;
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()?;
        bloodbank::metrics::register_metrics();
        info!(%address, "Prometheus metrics available at /metrics");
    }

    let bank = BloodBank::new(
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(InMemoryDonorDirectory::new()),
        Arc::new(SystemClock),
        Arc::new(TracingNotifier),
        BloodBankOptions {
            thresholds: LowStockThresholds::default(),
            paging: config.paging,
        },
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeper_handle = if config.sweeper.enabled {
        Some(
            bank.sweeper()
                .spawn(config.sweep_interval(), shutdown_tx.subscribe()),
        )
    } else {
        info!("Expiry sweeper disabled");
        None
    };

    shutdown_signal().await;

    let _ = shutdown_tx.send(());
    if let Some(handle) = sweeper_handle {
        let timeout = Duration::from_secs(config.shutdown_timeout);
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!("Expiry sweeper stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Expiry sweeper task failed"),
            Err(_) => warn!("Expiry sweeper shutdown timed out"),
        }
    }

    info!("Blood bank service stopped");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
