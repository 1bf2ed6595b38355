//! Processing pipeline for one job.
//!
//! `pending -> processing -> done | failed`. A record left `failed` by an
//! earlier attempt is re-armed to `pending` before the attempt starts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use clipo_media::{MediaError, MediaInspector, ThumbnailExtractor};
use clipo_models::{
    capture_timestamp, format_duration_display, thumbnail_file_name, Geometry, Job, RecordStatus,
    RecordUpdate,
};
use clipo_store::RecordStore;

use crate::config::WorkerConfig;
use crate::error::PipelineError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::RetryPolicy;

/// What a successful attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub duration_seconds: f64,
    pub thumbnail_reference: String,
}

/// How one attempt ended, and so what the worker does with the delivery.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Record is `done`. Ack.
    Done(Completed),
    /// Record is `failed` with this error. Nack with backoff.
    Failed(PipelineError),
    /// The record could not be read or written. Nack with backoff.
    Aborted(PipelineError),
    /// Shutdown interrupted the attempt between steps. Nack without delay.
    Cancelled,
}

impl PipelineOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, PipelineOutcome::Done(_))
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PipelineOutcome::Failed(e) | PipelineOutcome::Aborted(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs the inspection and thumbnail steps and keeps the record in step.
pub struct Pipeline {
    store: Arc<dyn RecordStore>,
    inspector: Arc<dyn MediaInspector>,
    thumbnailer: Arc<dyn ThumbnailExtractor>,
    thumbnail_dir: PathBuf,
    geometry: Geometry,
    max_attempts: u32,
    cancel_between_steps: bool,
}

impl Pipeline {
    /// `max_attempts` must match the queue's `max_retries`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        inspector: Arc<dyn MediaInspector>,
        thumbnailer: Arc<dyn ThumbnailExtractor>,
        config: &WorkerConfig,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            inspector,
            thumbnailer,
            thumbnail_dir: config.thumbnail_dir.clone(),
            geometry: config.thumbnail_geometry,
            max_attempts,
            cancel_between_steps: config.cancel_between_steps,
        }
    }

    /// Where the thumbnail of a stored upload is written.
    pub fn thumbnail_path(&self, stored_name: &str) -> PathBuf {
        self.thumbnail_dir.join(thumbnail_file_name(stored_name))
    }

    /// Run one attempt of `job`.
    ///
    /// `shutdown` is only consulted between the two steps, and only when
    /// `cancel_between_steps` is enabled.
    pub async fn run(
        &self,
        job: &Job,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> PipelineOutcome {
        let logger = JobLogger::new(job);
        let started = Instant::now();
        metrics::record_job_started();
        logger.log_start(&format!("processing {}", job.input_path.display()));

        match self.begin(job).await {
            Ok(Some(completed)) => {
                logger.log_warning("record is already done, acknowledging");
                return PipelineOutcome::Done(completed);
            }
            Ok(None) => {}
            Err(e) => {
                logger.log_error(&format!("cannot start attempt: {}", e));
                metrics::record_job_failed(e.kind(), started.elapsed().as_secs_f64());
                return PipelineOutcome::Aborted(e);
            }
        }

        let duration_seconds = match self.inspector.inspect(&job.input_path).await {
            Ok(d) if d.is_finite() && d >= 0.0 => d,
            Ok(d) => {
                let error = PipelineError::Inspection(MediaError::invalid_duration(d.to_string()));
                return self.fail(job, error, &logger, started).await;
            }
            Err(e) => {
                return self
                    .fail(job, PipelineError::Inspection(e), &logger, started)
                    .await
            }
        };
        logger.log_step(&format!(
            "duration {} ({:.3}s)",
            format_duration_display(duration_seconds),
            duration_seconds
        ));

        if self.cancel_between_steps && shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
            logger.log_warning("shutdown requested, giving the job back");
            return PipelineOutcome::Cancelled;
        }

        let thumbnail_reference = thumbnail_file_name(&job.stored_name);
        let output_path = self.thumbnail_dir.join(&thumbnail_reference);
        let timestamp = capture_timestamp(duration_seconds);

        if let Err(e) = self
            .thumbnailer
            .extract(&job.input_path, timestamp, &output_path, self.geometry)
            .await
        {
            return self
                .fail(job, PipelineError::Thumbnail(e), &logger, started)
                .await;
        }
        logger.log_step(&format!(
            "thumbnail {} at {:.3}s",
            output_path.display(),
            timestamp
        ));

        let update =
            RecordUpdate::done(duration_seconds, thumbnail_reference.clone(), job.attempt());
        if let Err(e) = self.store.update(&job.record_key, &update).await {
            logger.log_error(&format!("failed to record completion: {}", e));
            metrics::record_job_failed("store", started.elapsed().as_secs_f64());
            return PipelineOutcome::Aborted(e.into());
        }

        metrics::record_job_completed(started.elapsed().as_secs_f64());
        logger.log_completion(&format!(
            "{} ({})",
            thumbnail_reference,
            format_duration_display(duration_seconds)
        ));

        PipelineOutcome::Done(Completed {
            duration_seconds,
            thumbnail_reference,
        })
    }

    /// Move the record to `processing`, re-arming it first if a previous attempt failed.
    async fn begin(&self, job: &Job) -> Result<Option<Completed>, PipelineError> {
        let record = self
            .store
            .get(&job.record_key)
            .await?
            .ok_or_else(|| PipelineError::RecordNotFound(job.record_key.to_string()))?;

        match record.status {
            RecordStatus::Done => {
                return Ok(Some(Completed {
                    duration_seconds: record.duration_seconds.unwrap_or_default(),
                    thumbnail_reference: record.thumbnail_reference.unwrap_or_default(),
                }));
            }
            RecordStatus::Failed => {
                self.store
                    .update(&job.record_key, &RecordUpdate::rearm())
                    .await?;
            }
            // Processing means an earlier delivery died mid-attempt.
            RecordStatus::Pending | RecordStatus::Processing => {}
        }

        self.store
            .update(&job.record_key, &RecordUpdate::processing(job.attempt()))
            .await?;
        Ok(None)
    }

    /// Leave the record `failed` for good after the queue dead-lettered a
    /// job whose last attempt did not write a failure itself.
    pub async fn record_exhausted(&self, job: &Job, message: &str) -> Result<(), PipelineError> {
        let update = RecordUpdate::failed(message, job.attempt(), 0);
        self.store.update(&job.record_key, &update).await?;
        Ok(())
    }

    async fn fail(
        &self,
        job: &Job,
        error: PipelineError,
        logger: &JobLogger,
        started: Instant,
    ) -> PipelineOutcome {
        let remaining = RetryPolicy::attempts_remaining(job.attempt(), self.max_attempts);
        logger.log_error(&format!("{} ({} attempts remaining)", error, remaining));
        metrics::record_job_failed(error.kind(), started.elapsed().as_secs_f64());

        let update = RecordUpdate::failed(error.failure_message(), job.attempt(), remaining);
        match self.store.update(&job.record_key, &update).await {
            Ok(()) => PipelineOutcome::Failed(error),
            Err(e) => {
                logger.log_error(&format!("failed to record failure: {}", e));
                PipelineOutcome::Aborted(e.into())
            }
        }
    }
}
