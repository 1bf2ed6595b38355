//! API configuration.

use std::path::PathBuf;

use clipo_queue::{QueueBackend, QueueConfig};
use clipo_store::{StoreBackend, StoreConfig};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory uploads are stored in
    pub upload_dir: PathBuf,
    /// Directory thumbnails are served from
    pub thumbnail_dir: PathBuf,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Workers run inside the API process (0 = none)
    pub embedded_workers: usize,
    /// Expose `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            upload_dir: PathBuf::from("./uploads"),
            thumbnail_dir: PathBuf::from("./thumbnails"),
            cors_origins: vec!["*".to_string()],
            max_body_size: 1024 * 1024 * 1024, // 1GiB
            embedded_workers: 0,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            thumbnail_dir: std::env::var("THUMBNAIL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.thumbnail_dir),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            embedded_workers: std::env::var("API_EMBEDDED_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.embedded_workers),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Workers to run in this process.
    ///
    /// Memory backends are invisible to a separate worker process, so they
    /// always get at least one embedded worker.
    pub fn worker_count(&self, store: &StoreConfig, queue: &QueueConfig) -> usize {
        let private =
            store.backend == StoreBackend::Memory || queue.backend == QueueBackend::Memory;
        if private {
            self.embedded_workers.max(1)
        } else {
            self.embedded_workers
        }
    }

    /// Address to bind, as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
