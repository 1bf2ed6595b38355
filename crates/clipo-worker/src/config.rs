//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use clipo_media::DEFAULT_TOOL_TIMEOUT;
use clipo_models::Geometry;
use clipo_queue::{QueueBackend, QueueConfig};
use clipo_store::{StoreBackend, StoreConfig};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of workers, each running one job at a time
    pub concurrency: usize,
    /// Delay before a failed job is redelivered
    pub retry_backoff: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Interval for renewing the lease of the job being processed
    pub job_heartbeat_interval: Duration,
    /// Pause after a failed dequeue
    pub dequeue_error_backoff: Duration,
    /// Directory thumbnails are written to
    pub thumbnail_dir: PathBuf,
    /// Upper bound for one ffprobe/ffmpeg run
    pub tool_timeout: Duration,
    /// Thumbnail output size
    pub thumbnail_geometry: Geometry,
    /// Stop a job between inspection and thumbnail on shutdown
    pub cancel_between_steps: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retry_backoff: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            job_heartbeat_interval: Duration::from_secs(30),
            dequeue_error_backoff: Duration::from_secs(5),
            thumbnail_dir: PathBuf::from("thumbnails"),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            thumbnail_geometry: Geometry::default(),
            cancel_between_steps: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            concurrency: env_parse("WORKER_CONCURRENCY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.concurrency),
            retry_backoff: env_parse("WORKER_RETRY_BACKOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            job_heartbeat_interval: env_parse("WORKER_JOB_HEARTBEAT_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_heartbeat_interval),
            dequeue_error_backoff: defaults.dequeue_error_backoff,
            thumbnail_dir: std::env::var("THUMBNAIL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.thumbnail_dir),
            tool_timeout: env_parse("MEDIA_TOOL_TIMEOUT_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.tool_timeout),
            thumbnail_geometry: Geometry::new(
                env_parse("THUMBNAIL_WIDTH").unwrap_or(defaults.thumbnail_geometry.width),
                env_parse("THUMBNAIL_HEIGHT").unwrap_or(defaults.thumbnail_geometry.height),
            ),
            cancel_between_steps: std::env::var("WORKER_CANCEL_BETWEEN_STEPS")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.cancel_between_steps),
        }
    }
}

/// A standalone worker only sees jobs and records through shared backends.
pub fn require_shared_backends(store: &StoreConfig, queue: &QueueConfig) -> WorkerResult<()> {
    if store.backend == StoreBackend::Memory {
        return Err(WorkerError::config_error(
            "STORE_BACKEND=memory is private to this process; set STORE_BACKEND=redis \
             or run workers inside the API with API_EMBEDDED_WORKERS",
        ));
    }
    if queue.backend == QueueBackend::Memory {
        return Err(WorkerError::config_error(
            "QUEUE_BACKEND=memory is private to this process; set QUEUE_BACKEND=redis \
             or run workers inside the API with API_EMBEDDED_WORKERS",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backends_are_refused() {
        let redis_store = StoreConfig::redis("redis://localhost:6379");
        let redis_queue = QueueConfig::redis("redis://localhost:6379");

        assert!(require_shared_backends(&redis_store, &redis_queue).is_ok());
        assert!(matches!(
            require_shared_backends(&StoreConfig::default(), &redis_queue),
            Err(WorkerError::ConfigError(_))
        ));
        assert!(matches!(
            require_shared_backends(&redis_store, &QueueConfig::default()),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.retry_backoff, Duration::from_secs(60));
        assert_eq!(config.tool_timeout, Duration::from_secs(300));
        assert_eq!(config.thumbnail_geometry, Geometry::new(320, 240));
        assert!(!config.cancel_between_steps);
    }
}
