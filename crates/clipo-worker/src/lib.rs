//! Media processing worker.
//!
//! This crate provides:
//! - The processing pipeline (record state machine around the media tools)
//! - A pool of workers pulling jobs from the queue
//! - Fixed-delay retry policy
//! - The submission/query service used by the HTTP layer

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod service;

pub use config::{require_shared_backends, WorkerConfig};
pub use error::{PipelineError, ServiceError, ServiceResult, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{Completed, Pipeline, PipelineOutcome};
pub use pool::WorkerPool;
pub use retry::{FailureTracker, RetryPolicy};
pub use service::{MediaService, Submission};
