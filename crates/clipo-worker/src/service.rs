//! Submission and query facade over the record store and the job queue.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use clipo_models::{
    Job, JobId, Record, RecordKey, RecordStatus, RecordUpdate, RecordView,
    DEFAULT_THUMBNAIL_URL_PREFIX,
};
use clipo_queue::JobQueue;
use clipo_store::RecordStore;

use crate::error::{ServiceError, ServiceResult};

/// Identifiers handed back by `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub record_key: RecordKey,
    pub job_id: JobId,
}

/// Entry point for everything outside the worker: submit files, read records.
#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
    thumbnail_url_prefix: String,
}

impl MediaService {
    pub fn new(store: Arc<dyn RecordStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            queue,
            thumbnail_url_prefix: DEFAULT_THUMBNAIL_URL_PREFIX.to_string(),
        }
    }

    /// Set the URL prefix thumbnails are served under.
    pub fn with_thumbnail_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thumbnail_url_prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Register an already stored file and queue it for processing.
    ///
    /// Returns as soon as the job is enqueued.
    pub async fn submit(
        &self,
        input_path: impl Into<PathBuf>,
        original_filename: impl Into<String>,
    ) -> ServiceResult<Submission> {
        let record = Record::new(original_filename, input_path);
        let job_input = record.stored_path.clone();
        let stored_name = record.stored_name.clone();

        let record_key = self.store.create(record).await?;
        let job = Job::new(record_key.clone(), job_input, stored_name);
        let job_id = job.job_id.clone();

        self.queue.enqueue(job).await?;

        if let Err(e) = self
            .store
            .update(&record_key, &RecordUpdate::task_reference(&job_id))
            .await
        {
            // The job is queued either way; only the back-reference is missing.
            warn!(
                record_key = %record_key,
                job_id = %job_id,
                "Failed to write task reference: {}", e
            );
        }

        info!(record_key = %record_key, job_id = %job_id, "Submitted media for processing");
        Ok(Submission { record_key, job_id })
    }

    /// Last durably written status of a record.
    pub async fn get_status(&self, key: &RecordKey) -> ServiceResult<RecordStatus> {
        Ok(self.record(key).await?.status)
    }

    pub async fn get_metadata(&self, key: &RecordKey) -> ServiceResult<RecordView> {
        let record = self.record(key).await?;
        Ok(RecordView::from_record(&record, &self.thumbnail_url_prefix))
    }

    /// All records, newest submission first.
    pub async fn list_all(&self) -> ServiceResult<Vec<RecordView>> {
        let records = self.store.list().await?;
        Ok(records
            .iter()
            .map(|r| RecordView::from_record(r, &self.thumbnail_url_prefix))
            .collect())
    }

    async fn record(&self, key: &RecordKey) -> ServiceResult<Record> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| ServiceError::not_found(key.as_str()))
    }
}
