//! Media processing worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipo_media::{check_ffmpeg, check_ffprobe, FfmpegThumbnailer, FfprobeInspector};
use clipo_queue::QueueConfig;
use clipo_store::StoreConfig;
use clipo_worker::{require_shared_backends, Pipeline, WorkerConfig, WorkerPool};

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting clipo-worker v{}", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Ok(port) = std::env::var("WORKER_METRICS_PORT") {
        let addr: SocketAddr = format!("0.0.0.0:{}", port)
            .parse()
            .context("invalid WORKER_METRICS_PORT")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    for check in [check_ffprobe, check_ffmpeg] {
        if let Err(e) = check() {
            warn!("{}; jobs will fail until it is installed", e);
        }
    }

    let store_config = StoreConfig::from_env();
    let queue_config = QueueConfig::from_env();
    require_shared_backends(&store_config, &queue_config)?;

    let store = clipo_store::connect(&store_config)
        .await
        .context("failed to connect record store")?;
    let queue = clipo_queue::connect(&queue_config)
        .await
        .context("failed to connect job queue")?;

    tokio::fs::create_dir_all(&config.thumbnail_dir)
        .await
        .with_context(|| format!("failed to create {}", config.thumbnail_dir.display()))?;

    let pipeline = Arc::new(Pipeline::new(
        store,
        Arc::new(FfprobeInspector::new(config.tool_timeout)),
        Arc::new(FfmpegThumbnailer::new(config.tool_timeout)),
        &config,
        queue.max_retries(),
    ));

    let pool = WorkerPool::start(&config, queue, pipeline);

    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    pool.stop().await?;
    info!("Worker shutdown complete");
    Ok(())
}
