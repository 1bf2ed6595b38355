//! The job queue seam.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::QueueResult;
use clipo_models::{Job, JobId};

/// Outcome of a successful `nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redelivery {
    /// Attempt count the job will carry on its next delivery
    pub attempt_count: u32,
    /// How long until the job becomes visible again
    pub delay: Duration,
}

/// Durable queue of processing jobs.
///
/// At most one live delivery exists per job. A delivery holds a lease that
/// `heartbeat` renews; a job whose lease runs out is handed out again with
/// its attempt count bumped.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job. Returns once the job is stored.
    async fn enqueue(&self, job: Job) -> QueueResult<()>;

    /// Wait for the next deliverable job and lease it.
    async fn dequeue(&self) -> QueueResult<Job>;

    /// Mark a job complete and drop it. Unknown or already acked jobs are ignored.
    async fn ack(&self, job_id: &JobId) -> QueueResult<()>;

    /// Give a job back for redelivery after `delay`.
    ///
    /// Fails with `QueueError::RetryExhausted` once the job has used up
    /// `max_retries` attempts; the job is dead-lettered and removed.
    async fn nack(&self, job_id: &JobId, delay: Duration) -> QueueResult<Redelivery>;

    /// Hand an in-flight job back for immediate redelivery without spending
    /// an attempt. Used when the worker stops before the attempt could finish.
    async fn release(&self, job_id: &JobId) -> QueueResult<()>;

    /// Renew the lease of an in-flight job.
    async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()>;

    /// Jobs not yet acked or dead-lettered (ready, delayed and in flight).
    async fn len(&self) -> QueueResult<usize>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Jobs moved to the dead-letter set.
    async fn dead_letter_len(&self) -> QueueResult<usize>;

    /// Total attempts a job gets before it is dead-lettered.
    fn max_retries(&self) -> u32;
}
