//! Queue configuration.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::QueueError;

/// Which queue implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    /// Process-local queue; jobs are lost on restart
    #[default]
    Memory,
    /// Redis Streams consumer group
    Redis,
}

impl FromStr for QueueBackend {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(QueueBackend::Memory),
            "redis" => Ok(QueueBackend::Redis),
            other => Err(QueueError::Config(format!("unknown queue backend: {}", other))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Backend selection
    pub backend: QueueBackend,
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Consumer name of this process within the group
    pub consumer_name: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Total attempts before DLQ
    pub max_retries: u32,
    /// Lease length of a delivered job
    pub visibility_timeout: Duration,
    /// How long one XREADGROUP call blocks
    pub block_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "clipo:jobs".to_string(),
            consumer_group: "clipo:workers".to_string(),
            consumer_name: default_consumer_name(),
            dlq_stream_name: "clipo:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
            block_ms: 2000,
        }
    }
}

fn default_consumer_name() -> String {
    format!("consumer-{}", uuid::Uuid::new_v4())
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match std::env::var("QUEUE_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}, falling back to memory", e);
                QueueBackend::Memory
            }),
            Err(_) => defaults.backend,
        };

        Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME").unwrap_or(defaults.consumer_name),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_retries),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            block_ms: std::env::var("QUEUE_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.block_ms),
        }
    }

    /// Redis-backed config.
    pub fn redis(redis_url: impl Into<String>) -> Self {
        Self {
            backend: QueueBackend::Redis,
            redis_url: redis_url.into(),
            ..Default::default()
        }
    }

    /// Key of the sorted set holding nacked jobs until they are due.
    pub fn delayed_key(&self) -> String {
        format!("{}:delayed", self.stream_name)
    }

    /// Key of the hash mapping in-flight job IDs to stream message IDs.
    pub fn inflight_key(&self) -> String {
        format!("{}:inflight", self.stream_name)
    }
}
