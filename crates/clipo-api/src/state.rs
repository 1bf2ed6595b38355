//! Application state.

use std::sync::Arc;

use clipo_models::DEFAULT_THUMBNAIL_URL_PREFIX;
use clipo_queue::{JobQueue, QueueConfig};
use clipo_store::{RecordStore, StoreConfig};
use clipo_worker::MediaService;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub service: MediaService,
}

impl AppState {
    /// Build state over already connected backends.
    pub fn new(config: ApiConfig, store: Arc<dyn RecordStore>, queue: Arc<dyn JobQueue>) -> Self {
        let service =
            MediaService::new(store, queue).with_thumbnail_url_prefix(DEFAULT_THUMBNAIL_URL_PREFIX);
        Self { config, service }
    }

    /// Connect the configured record store and job queue.
    pub async fn connect(
        config: ApiConfig,
        store_config: &StoreConfig,
        queue_config: &QueueConfig,
    ) -> anyhow::Result<Self> {
        let store = clipo_store::connect(store_config).await?;
        let queue = clipo_queue::connect(queue_config).await?;
        Ok(Self::new(config, store, queue))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.service.store()
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        self.service.queue()
    }
}
