use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{
        complete_generation, debit, delete_generation, fail_generation, get_generation,
        get_mirror, grant, health, list_generations, start_generation, update_generation,
    },
    state::AppState,
};
use crate::cache::{CacheStore, MemoryCache, NoopCache};
use crate::config::Config;
use crate::history::HistoryService;
use crate::ledger::CreditLedger;
use crate::mirror::{spawn_workers, MirrorBroker, MirrorEngine, MirrorQueue};
use crate::observability::Metrics;
use crate::query::QueryEngine;
use crate::stats::StatsAggregator;
use crate::store::{DocStore, IndexRegistry};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wire the whole engine together from configuration: stores, broker +
/// consumer pool, services, and the shared state handed to the router.
/// Also replays any mirror tasks left unacknowledged by a previous run.
pub async fn build_state(config: Config) -> Result<AppState, AnyError> {
    let metrics = Arc::new(Metrics::new());

    let registry = IndexRegistry::new(config.query.composite_indexes.clone());
    let store_path = config.server.data_path.join("docs");
    info!(path = %store_path.display(), "Opening document store");
    let store = Arc::new(DocStore::open(&store_path, registry)?);

    let queue_path = config.server.data_path.join("mirror-queue");
    info!(path = %queue_path.display(), "Opening mirror queue");
    let queue = Arc::new(MirrorQueue::open(&queue_path)?);

    let (broker, receivers) =
        MirrorBroker::new(queue.clone(), config.mirror.workers, config.mirror.channel_size);
    let broker = Arc::new(broker);

    spawn_workers(
        receivers,
        store.clone(),
        queue.clone(),
        metrics.clone(),
        config.mirror.max_attempts,
        Duration::from_millis(config.mirror.retry_backoff_ms),
    );
    broker.replay().await?;

    let mirror = Arc::new(MirrorEngine::new(store.clone(), broker.clone(), metrics.clone()));
    let stats = Arc::new(StatsAggregator::new(store.clone()));
    let query = Arc::new(QueryEngine::new(
        store.clone(),
        metrics.clone(),
        config.query.over_fetch_factor,
        config.query.scan_max_iterations,
    ));
    let cache: Arc<dyn CacheStore> = if config.cache.enabled {
        Arc::new(MemoryCache::new(config.cache.capacity))
    } else {
        Arc::new(NoopCache)
    };

    let history = Arc::new(HistoryService::new(
        store.clone(),
        mirror,
        stats,
        query,
        cache,
        Duration::from_secs(config.cache.ttl_secs),
        metrics.clone(),
    ));
    let ledger = Arc::new(CreditLedger::new(store.clone(), metrics.clone()));

    Ok(AppState {
        config: Arc::new(config),
        history,
        ledger,
        store,
        queue,
        broker,
        metrics,
    })
}

/// The full route table over a prepared state. Split out so tests can
/// drive the router without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generations", post(start_generation).get(list_generations))
        .route(
            "/generations/{id}",
            get(get_generation)
                .patch(update_generation)
                .delete(delete_generation),
        )
        .route("/generations/{id}/complete", post(complete_generation))
        .route("/generations/{id}/fail", post(fail_generation))
        .route("/credits/debit", post(debit))
        .route("/credits/grant", post(grant))
        .route("/mirror/{id}", get(get_mirror))
        .route("/health", get(health))
        .with_state(state)
        // Transparently decompress gzip/deflate request bodies.
        .layer(RequestDecompressionLayer::new())
}

pub async fn run(address_override: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address_override.unwrap_or(config.server.bind_addr);

    let state = build_state(config).await?;
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "genloom API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
