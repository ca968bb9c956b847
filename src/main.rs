//! Gatehouse server binary
//!
//! Wires the shared store, cache, rate limiter and HTTP API together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse::catalog::InMemoryCatalog;
use gatehouse::clock::system_clock;
use gatehouse::{
    create_router, spawn_cleanup_task, AppState, Config, KeyValueStore, MemoryStore, RedisStore,
};

/// How long shutdown waits for pending cache write-backs
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main entry point for the gatehouse server.
///
/// # Startup Sequence
/// 1. Load `.env` and initialize tracing
/// 2. Load configuration from environment variables
/// 3. Connect to Redis, or create the in-memory store and its sweeper
/// 4. Start the cache population workers
/// 5. Start HTTP server on configured port
/// 6. On SIGINT/SIGTERM drain write-backs and stop background tasks
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gatehouse");

    let config = Config::from_env();
    info!(
        port = config.server_port,
        store = if config.redis_url.is_some() { "redis" } else { "memory" },
        populate_workers = config.populate_workers,
        populate_queue = config.populate_queue,
        "Configuration loaded"
    );

    let clock = system_clock();
    let (store, cleanup_handle): (Arc<dyn KeyValueStore>, Option<JoinHandle<()>>) =
        match &config.redis_url {
            Some(url) => {
                let store = RedisStore::connect(url, config.store_timeout)
                    .await
                    .context("failed to connect to the shared store")?;
                (Arc::new(store), None)
            }
            None => {
                let store = Arc::new(MemoryStore::new(config.memory_max_keys, clock.clone()));
                let handle = spawn_cleanup_task(store.clone(), config.cleanup_interval);
                (store, Some(handle))
            }
        };

    let catalog = Arc::new(InMemoryCatalog::seeded());
    let (state, populate_handle) = AppState::start(store, clock, catalog, config.clone());
    let queue = state.queue.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    if !queue.wait_idle(DRAIN_TIMEOUT).await {
        warn!(stats = ?queue.stats(), "Pending cache write-backs abandoned");
    }
    populate_handle.abort();
    if let Some(handle) = cleanup_handle {
        handle.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
