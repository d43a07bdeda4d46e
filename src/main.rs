use uniswap_fee_indexer::clients::binance::BinanceClient;
use uniswap_fee_indexer::clients::etherscan::EtherscanClient;
use uniswap_fee_indexer::clients::node::NodeClient;
use uniswap_fee_indexer::syncer::supervisor;
use uniswap_fee_indexer::{api, db, AppState, Config, Syncer};

use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting uniswap-fee-indexer");

    let config = Config::from_env()?;

    let db_pool = db::connection::establish_connection(&config.db_uri).await?;
    info!("Database connection established");

    db::migration::run_migrations(&db_pool).await?;

    let etherscan = EtherscanClient::new(&config.etherscan)?;
    let binance = BinanceClient::new(&config.binance)?;
    let node = NodeClient::new(&config.node)?;

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db_pool: db_pool.clone(),
    });

    let shutdown = CancellationToken::new();

    let syncer = Arc::new(Syncer::new(
        config.clone(),
        db_pool,
        etherscan,
        binance,
        node,
    ));
    let supervisor_shutdown = shutdown.clone();
    let supervisor_handle = tokio::spawn(async move {
        if let Err(e) = supervisor::start(syncer, supervisor_shutdown.clone()).await {
            error!("Sync supervisor failed: {}", e);
            // A supervisor that cannot start leaves nothing indexing; take
            // the rest of the process down with it.
            supervisor_shutdown.cancel();
        }
    });
    info!("Sync supervisor started");

    let app = api::route::create_router(app_state);
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
            })
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Starting graceful shutdown");
        }
        _ = shutdown.cancelled() => {
            warn!("Internal component requested shutdown");
        }
    }

    shutdown.cancel();

    let drain_timeout = tokio::time::Duration::from_secs(10);

    tokio::select! {
        _ = tokio::time::sleep(drain_timeout) => {
            warn!("Supervisor shutdown timed out after {:?}, forcing exit", drain_timeout);
        }
        _ = supervisor_handle => {
            info!("Sync supervisor shut down");
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(drain_timeout) => {
            warn!("Server shutdown timed out, forcing exit");
        }
        _ = server_handle => {
            info!("HTTP server shut down");
        }
    }

    info!("All components shut down, exiting");
    Ok(())
}
