use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warp::Filter;

mod agents;
mod api;
mod channel;
mod config;
mod error;
mod llm;
mod memory;
mod metrics;
mod middleware;
mod models;
mod redis_client;
mod router;
mod runtime;
mod store;
mod worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration; the first argument, if any, overrides MODE
    let mut config = config::Config::from_env()?;
    if let Some(mode) = std::env::args().nth(1) {
        config.mode = mode.parse()?;
        config.validate()?;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(mode = ?config.mode, backend = ?config.queue_backend, "Starting agent orchestrator");

    let metrics = Arc::new(metrics::Metrics::new());
    let backend = runtime::Backend::from_config(&config);
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if config.mode.runs_workers() {
        let generator = llm::from_config(&config)?;
        info!(mock = config.mock_mode, roles = ?config.worker_roles, "Starting agent workers");
        handles.extend(
            runtime::spawn_workers(&backend, &config, generator, metrics.clone(), shutdown.clone())
                .await?,
        );
    }

    if config.mode.runs_router() {
        handles.push(
            runtime::spawn_router(&backend, &config, metrics.clone(), shutdown.clone()).await?,
        );
        info!("Router started");
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    });

    if config.mode.runs_api() {
        let router = runtime::build_router(&backend, &config, metrics.clone()).await?;
        let limiter = middleware::submit_limiter(config.submit_rate_per_sec);

        // Build API routes
        let routes = api::routes(router, metrics.clone(), limiter, config.stream_interval())
            .recover(error::handle_rejection)
            .with(warp::log("api"))
            .with(middleware::cors());

        // Start server
        let addr = ([0, 0, 0, 0], config.port);
        let (bound, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, {
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })?;
        info!("Server listening on {}", bound);
        server.await;
    } else {
        shutdown.cancelled().await;
    }

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Background loop panicked");
        }
    }
    info!("Shutdown complete");

    Ok(())
}
