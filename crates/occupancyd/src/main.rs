use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use occupancyd::Config;
use occupancyd::Registry;
use occupancyd::RegistrySettings;
use occupancyd::api;
use occupancyd::host;
use occupancyd::store::JsonFileStore;
use tokio::sync::oneshot;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Occupancy sensor bridge
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(default_value = "occupancyd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_exists = args.config.exists();
    let config = if config_exists {
        Config::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {}", args.config.display()))?
    } else {
        Config::default()
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("occupancyd starting");
    if config_exists {
        tracing::info!("Loaded config from: {}", args.config.display());
    } else {
        tracing::warn!(
            "No config at {}, using defaults",
            args.config.display()
        );
    }
    tracing::info!(
        "Decay window {}s, tick interval {}s",
        config.occupancy.decay_window_secs,
        config.occupancy.tick_interval_secs
    );

    let store = JsonFileStore::open(&config.store.path)
        .await
        .with_context(|| {
            format!(
                "Failed to open accessory store {}",
                config.store.path.display()
            )
        })?;
    tracing::info!("Accessory store at {}", store.path().display());
    let host = host::from_config(&config)
        .await
        .context("Failed to set up host platform")?;
    tracing::info!("Using host platform: {}", host.name());

    let registry = Arc::new(Registry::new(
        Arc::new(store),
        host,
        RegistrySettings::from(&config.occupancy),
    ));

    // Clear occupancy a previous run may have left on the host
    let reset = registry
        .reset_stored()
        .await
        .context("Failed to read accessory store")?;
    tracing::info!("Marked {} stored accessories unoccupied", reset);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
            }
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        }
        let _ = shutdown_tx.send(());
    });

    tracing::info!("Press Ctrl+C to exit");
    let served = api::serve(&config.api, registry.clone(), shutdown_rx).await;

    registry.shutdown().await;
    tracing::info!("occupancyd shutdown complete");

    served
}
