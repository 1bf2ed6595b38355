//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipo_api::{create_router, metrics, ApiConfig, AppState};
use clipo_media::{FfmpegThumbnailer, FfprobeInspector};
use clipo_queue::QueueConfig;
use clipo_store::StoreConfig;
use clipo_worker::{Pipeline, WorkerConfig, WorkerPool};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipo=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Run a worker pool inside the API process.
fn start_embedded_workers(config: &ApiConfig, state: &AppState, concurrency: usize) -> WorkerPool {
    let worker_config = WorkerConfig {
        concurrency,
        thumbnail_dir: config.thumbnail_dir.clone(),
        ..WorkerConfig::from_env()
    };

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(state.store()),
        Arc::new(FfprobeInspector::new(worker_config.tool_timeout)),
        Arc::new(FfmpegThumbnailer::new(worker_config.tool_timeout)),
        &worker_config,
        state.queue().max_retries(),
    ));

    WorkerPool::start(&worker_config, Arc::clone(state.queue()), pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting clipo-api v{}", env!("CARGO_PKG_VERSION"));

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    for dir in [&config.upload_dir, &config.thumbnail_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let store_config = StoreConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let state = AppState::connect(config.clone(), &store_config, &queue_config)
        .await
        .context("failed to create application state")?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let worker_count = config.worker_count(&store_config, &queue_config);
    if worker_count > config.embedded_workers {
        warn!("Memory store or queue is private to this process, running an embedded worker");
    }
    let workers = if worker_count > 0 {
        info!("Running {} embedded workers", worker_count);
        Some(start_embedded_workers(&config, &state, worker_count))
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .context("invalid bind address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(pool) = workers {
        if let Err(e) = pool.stop().await {
            warn!("Embedded workers did not stop cleanly: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Received shutdown signal");
}
