//! In-process record store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use clipo_models::{Record, RecordKey, RecordUpdate};

/// Record store backed by a locked map.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordKey, Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: Record) -> StoreResult<RecordKey> {
        let mut records = self.records.write();
        if records.contains_key(&record.key) {
            return Err(StoreError::AlreadyExists(record.key.to_string()));
        }
        let key = record.key.clone();
        records.insert(key.clone(), record);
        Ok(key)
    }

    async fn update(&self, key: &RecordKey, update: &RecordUpdate) -> StoreResult<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key.as_str()))?;
        record.apply(update);
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Record>> {
        let mut records: Vec<Record> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clipo_models::RecordStatus;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryRecordStore::new();
        let record = Record::new("a.mp4", "/uploads/a.mp4");
        let key = store.create(record.clone()).await.unwrap();

        assert_eq!(key, record.key);
        assert_eq!(store.get(&key).await.unwrap(), Some(record));
        assert!(store.get(&RecordKey::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let store = MemoryRecordStore::new();
        let record = Record::new("a.mp4", "/uploads/a.mp4");
        store.create(record.clone()).await.unwrap();

        let err = store.create(record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryRecordStore::new();
        let err = store
            .update(&RecordKey::new(), &RecordUpdate::processing(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_is_visible_to_reads() {
        let store = MemoryRecordStore::new();
        let key = store
            .create(Record::new("a.mp4", "/uploads/a.mp4"))
            .await
            .unwrap();

        store.update(&key, &RecordUpdate::processing(1)).await.unwrap();
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Processing);
        assert_eq!(record.attempt, 1);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryRecordStore::new();

        let mut older = Record::new("old.mp4", "/uploads/old.mp4");
        older.submitted_at = older.submitted_at - Duration::minutes(5);
        let newer = Record::new("new.mp4", "/uploads/new.mp4");

        store.create(older.clone()).await.unwrap();
        store.create(newer.clone()).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, newer.key);
        assert_eq!(listed[1].key, older.key);
    }
}
