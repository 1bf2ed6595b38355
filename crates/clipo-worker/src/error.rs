//! Worker error types.

use thiserror::Error;

use clipo_media::MediaError;
use clipo_queue::QueueError;
use clipo_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Why one pipeline attempt did not reach `done`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to extract duration: {0}")]
    Inspection(#[source] MediaError),

    #[error("Failed to generate thumbnail: {0}")]
    Thumbnail(#[source] MediaError),

    #[error("Cancelled by shutdown")]
    Cancelled,
}

impl PipelineError {
    /// Text written to the record's `error_message`: the tool error as reported.
    pub fn failure_message(&self) -> String {
        match self {
            PipelineError::Inspection(e) | PipelineError::Thumbnail(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// The record itself could not be read or written.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            PipelineError::RecordNotFound(_) | PipelineError::Store(_)
        )
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RecordNotFound(_) => "record_not_found",
            PipelineError::Store(_) => "store",
            PipelineError::Inspection(_) => "inspection",
            PipelineError::Thumbnail(_) => "thumbnail",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

/// Errors of the submission/query service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ServiceError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }
}

/// Errors that stop the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Workers did not stop within {0} seconds")]
    ShutdownTimeout(u64),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
