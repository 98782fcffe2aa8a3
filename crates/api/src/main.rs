//! Courier API server binary entrypoint.
//!
//! Runs the HTTP surface and the dispatch loop in one process, sharing a
//! single recovered message queue.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::db::{create_pool, run_migrations};
use courier_engine::{InMemoryMessageStore, MessageQueue, MessageStore, PgMessageStore};
use courier_handlers::HandlerRegistry;
use courier_notifier::Dispatcher;

use courier_api::routes::create_router;
use courier_api::state::AppState;

const DEFAULT_LOG_FILTER: &str = "courier_api=info,courier_engine=info,courier_notifier=info,courier_handlers=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (loads .env so RUST_LOG and LOG_FORMAT apply)
    let json_logs = AppConfig::json_logs_requested();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Courier API server...");

    // Load configuration
    let config = AppConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;

    // Select the message store
    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.db_max_connections).await?;
            run_migrations(&pool).await?;
            Arc::new(PgMessageStore::new(pool))
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set, using the in-memory message store; queued messages will not survive a restart"
            );
            Arc::new(InMemoryMessageStore::new())
        }
    };

    // Rebuild the queue from unfinished records
    let queue = Arc::new(MessageQueue::recover(store).await?);

    let handlers = HandlerRegistry::simulated(config.simulate_failures);
    tracing::info!(
        kinds = ?handlers.kinds(),
        simulate_failures = config.simulate_failures,
        "Handler registry built"
    );

    // Start the dispatch loop
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::from_config(queue.clone(), handlers, &config).spawn(shutdown.clone());

    // Build router
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let state = AppState::new(queue, config);
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The server may also stop on its own; make sure the dispatcher follows.
    shutdown.cancel();
    dispatcher.await?;

    tracing::info!("Courier API server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, cancelling `shutdown` so the dispatcher winds down too.
async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}
