//! Structured job logging.

use tracing::{error, info, warn, Span};

use clipo_models::Job;

/// Logs job lifecycle events with the job's identifying fields attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    record_key: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            record_key: job.record_key.to_string(),
            attempt: job.attempt(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            record_key = %self.record_key,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_step(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            record_key = %self.record_key,
            attempt = self.attempt,
            "Job step: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            record_key = %self.record_key,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            record_key = %self.record_key,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            record_key = %self.record_key,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Span covering everything a worker does for this delivery.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            record_key = %self.record_key,
            attempt = self.attempt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipo_models::RecordKey;

    #[test]
    fn test_job_logger_fields() {
        let job = Job::new(RecordKey::new(), "/uploads/a.mp4", "a.mp4").next_attempt();
        let logger = JobLogger::new(&job);

        assert_eq!(logger.job_id(), job.job_id.as_str());
        assert_eq!(logger.attempt(), 2);
    }
}
