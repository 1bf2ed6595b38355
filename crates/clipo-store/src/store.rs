//! The record store seam.

use async_trait::async_trait;

use crate::error::StoreResult;
use clipo_models::{Record, RecordKey, RecordUpdate};

/// Durable storage of processing records.
///
/// Every call is atomic for a single record and reads observe earlier writes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record and return its key.
    async fn create(&self, record: Record) -> StoreResult<RecordKey>;

    /// Apply a partial update. Fails with `StoreError::NotFound` if the record is missing.
    async fn update(&self, key: &RecordKey, update: &RecordUpdate) -> StoreResult<()>;

    /// Fetch one record.
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>>;

    /// All records, newest submission first.
    async fn list(&self) -> StoreResult<Vec<Record>>;
}
