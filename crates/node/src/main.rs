//! Oracle relay
//!
//! Main entry point: probes RPC endpoints, fetches prices into the cache and
//! reports status until shutdown.

mod settings;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oracle_core::{network_label, AppConfig, FeedKey, PriceSource, PYTH_NETWORK_ID};
use oracle_endpoints::{EndpointProbe, EndpointSelector, FailoverConfig, FailoverController, SelectorConfig};
use oracle_price_feed::{
    FetchOrchestrator, HermesClient, JsonRpcChainClient, OrchestratorConfig, PriceCache, StatusReporter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting oracle relay v{}", env!("CARGO_PKG_VERSION"));

    let config_path = settings::config_path();
    let config = settings::load()?;
    info!(
        "Loaded config from {}: {} networks, {} off-chain feeds",
        config_path.display(),
        config.networks.len(),
        config.pyth.as_ref().map(|p| p.feeds.len()).unwrap_or(0)
    );

    let monitoring = &config.monitoring;

    // Endpoint selection and failover
    let selector = Arc::new(EndpointSelector::from_networks(
        &config.networks,
        EndpointProbe::http(monitoring.probe_timeout()),
        SelectorConfig {
            probe_interval: monitoring.probe_interval(),
            ..Default::default()
        },
    ));
    selector.refresh_all().await;
    for network in selector.networks() {
        if selector.get_best_transport(network).is_err() {
            warn!("No RPC endpoint selected yet for {}", network_label(network));
        }
    }

    let failover = Arc::new(FailoverController::new(
        Arc::clone(&selector),
        FailoverConfig {
            max_retries: monitoring.max_retries,
            retry_delay: monitoring.retry_delay(),
        },
    ));

    // Cache and tracked feeds
    let cache = Arc::new(PriceCache::new(config.cache.max_size_bytes));
    let symbols = register_feeds(&cache, &config);

    let mut orchestrator = FetchOrchestrator::new(
        Arc::clone(&cache),
        failover,
        Arc::new(JsonRpcChainClient::new()),
        OrchestratorConfig {
            fetch_interval: monitoring.fetch_interval(),
            max_concurrent_fetches: monitoring.max_concurrent_fetches,
        },
    );
    if let Some(pyth) = &config.pyth {
        let offchain_symbols = pyth
            .feeds
            .iter()
            .filter_map(|f| f.symbol.clone().map(|symbol| (f.id.clone(), symbol)))
            .collect();
        orchestrator = orchestrator.with_offchain(Arc::new(HermesClient::from_config(pyth)?), offchain_symbols);
        info!("Off-chain prices from {}", pyth.endpoint);
    }
    let orchestrator = Arc::new(orchestrator);

    let reporter = Arc::new(
        StatusReporter::new(Arc::clone(&cache), monitoring.status_interval())
            .with_selector(Arc::clone(&selector))
            .with_symbols(symbols),
    );

    // Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = selector.spawn_probe_loops(shutdown_rx.clone());
    handles.push(orchestrator.spawn(shutdown_rx.clone()));
    handles.push(reporter.spawn(shutdown_rx));
    info!("Background services started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Received shutdown signal, initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Track every configured feed; returns the symbol table for status output
fn register_feeds(cache: &PriceCache, config: &AppConfig) -> HashMap<FeedKey, String> {
    let mut symbols = HashMap::new();

    for network in &config.networks {
        for feed in &network.feeds {
            cache.add_feed(network.network_id, &PriceSource::Chainlink, &feed.address);
            if let Some(symbol) = &feed.symbol {
                symbols.insert(
                    FeedKey::new(network.network_id, PriceSource::Chainlink, feed.address.as_str()),
                    symbol.clone(),
                );
            }
        }
        info!(
            "Tracking {} feeds on {}",
            network.feeds.len(),
            network_label(network.network_id)
        );
    }

    if let Some(pyth) = &config.pyth {
        for feed in &pyth.feeds {
            cache.add_feed(PYTH_NETWORK_ID, &PriceSource::Pyth, &feed.id);
            if let Some(symbol) = &feed.symbol {
                symbols.insert(FeedKey::new(PYTH_NETWORK_ID, PriceSource::Pyth, feed.id.as_str()), symbol.clone());
            }
        }
    }

    symbols
}

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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
