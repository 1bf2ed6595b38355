//! Record store for processing records.
//!
//! This crate provides:
//! - The `RecordStore` trait (create, partial update, get, list)
//! - An in-memory store for tests and single-process deployments
//! - A Redis hash store with an index sorted by submission time

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

use std::sync::Arc;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryRecordStore;
pub use redis_store::RedisRecordStore;
pub use store::RecordStore;

/// Build the store selected by `config`.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn RecordStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryRecordStore::new())),
        StoreBackend::Redis => Ok(Arc::new(RedisRecordStore::connect(config).await?)),
    }
}
