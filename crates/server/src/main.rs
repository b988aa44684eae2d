//! PriceHub - multi-exchange price aggregation
//!
//! Main entry point for the daemon

use std::env;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pricehub_server::{Daemon, SettingsLoader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Starting PriceHub v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut loader = SettingsLoader::new();
    if let Ok(path) = env::var("PRICEHUB_CONFIG") {
        loader = loader.with_file(path);
    }
    let settings = loader.load()?;

    info!(
        pairs = ?settings.pairs,
        exchanges = ?settings.exchanges,
        interval_secs = settings.fetch_interval,
        "configuration loaded"
    );

    // Setup shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C");
            }
            _ = terminate => {
                info!("Received termination signal");
            }
        }

        let _ = shutdown_tx.send(true);
    });

    info!("Press Ctrl+C to shutdown");

    if let Err(e) = Daemon::new(settings).run(shutdown_rx).await {
        error!("Daemon error: {:#}", e);
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
