#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use ipblock_pool::PoolManager;
use server::config::{CliArgs, ServerConfig};
use server::service::router;
use server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let store = config.backend.connect(config.consul.clone());
    let pool = Arc::new(PoolManager::new(config.pool.clone(), store).await?);

    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config, &pool);

    let app = router(Arc::clone(&pool)).layer(
        ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.flush_deferred_releases().await;
    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &ServerConfig, pool: &PoolManager) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting block pool service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting block pool service on {} using {:?} store",
            config.server_addr,
            config.backend
        );
    }
    let cursor = pool.cursor();
    tracing::info!(
        start = %cursor.start,
        end = %cursor.end,
        next = %cursor.next,
        block_size = pool.block_size(),
        "Pool ready"
    );
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
