//! Pool of workers pulling jobs from the queue.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use clipo_models::Job;
use clipo_queue::{JobQueue, QueueError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::retry::{FailureTracker, RetryPolicy};

/// Fixed set of worker tasks sharing one queue and one pipeline.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `config.concurrency` workers.
    pub fn start(config: &WorkerConfig, queue: Arc<dyn JobQueue>, pipeline: Arc<Pipeline>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let retry = RetryPolicy::fixed(config.retry_backoff);

        info!(
            "Starting worker pool with {} workers (retry backoff {:?}, max attempts {})",
            config.concurrency,
            config.retry_backoff,
            queue.max_retries()
        );

        let handles = (0..config.concurrency.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    pipeline: Arc::clone(&pipeline),
                    retry,
                    heartbeat_interval: config.job_heartbeat_interval,
                    error_backoff: config.dequeue_error_backoff,
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            handles,
            shutdown,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown. Workers stop dequeuing and finish their current job.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for every worker to exit, up to the shutdown timeout.
    pub async fn join(self) -> WorkerResult<()> {
        let mut handles = self.handles;
        let all = futures::future::join_all(handles.iter_mut());

        match tokio::time::timeout(self.shutdown_timeout, all).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Worker task ended abnormally: {}", e);
                    }
                }
                info!("Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Workers still busy after {:?}, aborting",
                    self.shutdown_timeout
                );
                for handle in &handles {
                    handle.abort();
                }
                Err(WorkerError::ShutdownTimeout(
                    self.shutdown_timeout.as_secs(),
                ))
            }
        }
    }

    /// `shutdown` followed by `join`.
    pub async fn stop(self) -> WorkerResult<()> {
        self.shutdown();
        self.join().await
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<Pipeline>,
    retry: RetryPolicy,
    heartbeat_interval: Duration,
    error_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!("Worker {} started", self.id);
        let mut failures = FailureTracker::new(3);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = self.queue.dequeue() => next,
            };

            match next {
                Ok(job) => {
                    failures.record_success();
                    self.execute(job).await;
                }
                Err(e) => {
                    if failures.record_failure() {
                        error!("Worker {} failed to dequeue: {}", self.id, e);
                    }
                    tokio::select! {
                        _ = self.shutdown.changed() => {}
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    /// Run one delivery to an ack, nack or release. Never fails.
    async fn execute(&self, job: Job) {
        let logger = JobLogger::new(&job);
        let span = logger.span();

        async {
            let attempt =
                AssertUnwindSafe(self.pipeline.run(&job, Some(&self.shutdown))).catch_unwind();

            let outcome = tokio::select! {
                outcome = attempt => outcome,
                never = self.keep_leased(&job) => match never {},
            };

            match outcome {
                Ok(PipelineOutcome::Done(_)) => {
                    if let Err(e) = self.queue.ack(&job.job_id).await {
                        logger.log_error(&format!("failed to ack: {}", e));
                    }
                }
                Ok(PipelineOutcome::Cancelled) => match self.queue.release(&job.job_id).await {
                    Ok(()) => logger.log_warning("released for redelivery"),
                    Err(e) => logger.log_error(&format!("failed to release: {}", e)),
                },
                // The record already carries the failure and its remaining attempts.
                Ok(PipelineOutcome::Failed(_)) => {
                    self.give_back(&job, &logger).await;
                }
                Ok(PipelineOutcome::Aborted(e)) => {
                    if self.give_back(&job, &logger).await {
                        self.settle_record(&job, &e.failure_message(), &logger)
                            .await;
                    }
                }
                Err(_) => {
                    logger.log_error("pipeline panicked");
                    if self.give_back(&job, &logger).await {
                        self.settle_record(&job, "pipeline panicked", &logger).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Nack with backoff. Returns true when the job was dead-lettered instead.
    async fn give_back(&self, job: &Job, logger: &JobLogger) -> bool {
        let delay = self.retry.delay_for_attempt(job.attempt());
        match self.queue.nack(&job.job_id, delay).await {
            Ok(redelivery) => {
                metrics::record_job_retried();
                logger.log_warning(&format!(
                    "will be retried in {:?} (attempt {}/{})",
                    redelivery.delay,
                    redelivery.attempt_count + 1,
                    self.queue.max_retries()
                ));
                false
            }
            Err(QueueError::RetryExhausted { attempts, .. }) => {
                metrics::record_job_dead_lettered();
                logger.log_error(&format!(
                    "exceeded max retries ({}), moved to DLQ",
                    attempts
                ));
                true
            }
            Err(e) => {
                logger.log_error(&format!("failed to nack: {}", e));
                false
            }
        }
    }

    /// Mark the record of a dead-lettered job `failed` with no attempts left.
    async fn settle_record(&self, job: &Job, message: &str, logger: &JobLogger) {
        if let Err(e) = self.pipeline.record_exhausted(job, message).await {
            logger.log_error(&format!("failed to record final failure: {}", e));
        }
    }

    /// Renew the job's lease until dropped.
    async fn keep_leased(&self, job: &Job) -> Infallible {
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        loop {
            interval.tick().await;
            if let Err(e) = self.queue.heartbeat(&job.job_id).await {
                warn!(job_id = %job.job_id, "Failed to renew lease: {}", e);
            }
        }
    }
}
