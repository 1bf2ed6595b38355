//! Record store configuration.

use std::str::FromStr;
use tracing::warn;

use crate::error::StoreError;

/// Which store implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// Process-local map; records are lost on restart
    #[default]
    Memory,
    /// Redis hashes
    Redis,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(StoreError::Config(format!("unknown store backend: {}", other))),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix of every key the store writes
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "clipo".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match std::env::var("STORE_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}, falling back to memory", e);
                StoreBackend::Memory
            }),
            Err(_) => defaults.backend,
        };

        Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }

    /// Redis-backed config.
    pub fn redis(redis_url: impl Into<String>) -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: redis_url.into(),
            ..Default::default()
        }
    }
}
