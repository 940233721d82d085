//! swapmatch - swap targeting and proposal resolution service
//!
//! Hosts the targeting coordinator, proposal resolver and settlement
//! coordinator behind an HTTP API, with a periodic sweeper closing idle
//! auctions.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use swapmatch::api::{self, AppState};
use swapmatch::audit::ConsistencyValidator;
use swapmatch::config::Settings;
use swapmatch::external::{LogNotifier, NullLedger, PermissiveCatalog};
use swapmatch::metrics::MetricsServer;
use swapmatch::resolver::ProposalResolver;
use swapmatch::retry::RetryPolicy;
use swapmatch::settlement::SettlementCoordinator;
use swapmatch::store::{MemoryStore, SwapStore};
use swapmatch::sweep::AuctionSweeper;
use swapmatch::targeting::{HistoryLog, TargetingCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting swapmatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(instance = %settings.service.instance_id, "Loaded configuration");

    // Backing store and collaborator stand-ins
    let store: Arc<dyn SwapStore> = Arc::new(MemoryStore::new());
    let notifier = Arc::new(LogNotifier);
    let catalog = Arc::new(PermissiveCatalog);
    let ledger = Arc::new(NullLedger);
    let history = Arc::new(HistoryLog::new(settings.service.history_page_size));
    let retry = RetryPolicy::new(&settings.retry);

    // Core components
    let targeting = Arc::new(TargetingCoordinator::new(
        store.clone(),
        history,
        ledger.clone(),
        notifier.clone(),
        retry.clone(),
    ));
    let resolver = Arc::new(ProposalResolver::new(
        store.clone(),
        catalog,
        ledger,
        notifier.clone(),
        retry.clone(),
    ));
    let settlement = Arc::new(SettlementCoordinator::new(
        store.clone(),
        notifier,
        retry,
    ));
    let validator = Arc::new(ConsistencyValidator::new(store.clone()));
    info!("Core components initialized");

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Periodic auction sweep
    let sweeper = Arc::new(AuctionSweeper::new(
        store.clone(),
        resolver.clone(),
        std::time::Duration::from_secs(settings.service.sweep_interval_secs),
    ));

    // Start API server
    let api_state = AppState {
        store,
        targeting,
        resolver,
        settlement,
        validator,
    };
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(api_config, api_state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start auction sweeper
    let sweeper_handle = tokio::spawn({
        let sweeper = sweeper.clone();
        async move {
            sweeper.run().await;
        }
    });

    info!("swapmatch is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    sweeper.stop().await;

    // Abort background tasks
    api_handle.abort();
    sweeper_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("swapmatch stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swapmatch=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
