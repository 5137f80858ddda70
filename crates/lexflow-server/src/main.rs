//! # LexFlow Server
//!
//! Main entry point for the LexFlow job engine. Wires the configured
//! job store, the engine, one worker pool per queue, the lease sweeper,
//! and the REST monitoring API into a single process.

use lexflow_config::{AppConfig, ConfigLoader};
use lexflow_core::{LexError, LexResult};
use lexflow_jobs::metrics::register_metrics;
use lexflow_jobs::store::{create_pool, MemoryJobStore, RedisJobStore};
use lexflow_jobs::{JobControl, JobEngine, JobStore, QueueName, StoreBackend};
use lexflow_rest::{create_router, AppState};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

mod processors;

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting LexFlow server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run().await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> LexResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    info!("Environment: {}", config.app.environment);

    if config.observability.metrics_enabled {
        register_metrics();
    }

    let store = build_store(&config).await?;
    let engine = Arc::new(JobEngine::new(store, config.jobs.clone()));

    // Lease sweeper and worker pools drain on the same shutdown signal
    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper = engine.dispatcher().spawn_sweeper(shutdown_tx.subscribe());

    let pools = vec![
        Arc::new(engine.worker_pool(
            QueueName::DocumentProcessing,
            processors::document_processing_handler(),
        )),
        Arc::new(engine.worker_pool(QueueName::UserRequests, processors::user_request_handler())),
        Arc::new(engine.worker_pool(QueueName::AiAnalysis, processors::ai_analysis_handler())),
    ];

    let mut pool_tasks = Vec::new();
    for pool in &pools {
        info!(pool_id = pool.id(), "Starting worker pool");
        let pool = Arc::clone(pool);
        pool_tasks.push(tokio::spawn(async move { pool.start().await }));
    }

    let state = AppState::new(engine.clone() as Arc<dyn JobControl>);
    let router = create_router(state, &config.server);

    let rest_addr = config.server.rest_addr();
    info!("Starting REST server on http://{}", rest_addr);

    let listener = tokio::net::TcpListener::bind(&rest_addr)
        .await
        .map_err(|e| LexError::internal(format!("Failed to bind REST: {}", e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LexError::internal(format!("REST server error: {}", e)))?;

    info!("Draining worker pools...");
    for pool in &pools {
        pool.stop();
    }
    for task in pool_tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Worker pool exited with error: {}", e),
            Err(e) => error!("Worker pool task panicked: {}", e),
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = sweeper.await {
        error!("Lease sweeper task panicked: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Builds the job store selected by the configuration.
async fn build_store(config: &AppConfig) -> LexResult<Arc<dyn JobStore>> {
    match config.jobs.backend {
        StoreBackend::Memory => {
            info!("Using in-memory job store");
            Ok(Arc::new(MemoryJobStore::new(config.jobs.priority.boost_ms)))
        }
        StoreBackend::Redis => {
            info!(url = %config.jobs.redis.url, "Using Redis job store");
            let pool = create_pool(&config.jobs.redis).await?;
            Ok(Arc::new(RedisJobStore::new(
                pool,
                config.jobs.redis.key_prefix.clone(),
                config.jobs.priority.boost_ms,
            )))
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lexflow=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
