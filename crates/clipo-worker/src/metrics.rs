//! Job processing metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "clipo_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "clipo_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "clipo_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "clipo_jobs_retried_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "clipo_jobs_dead_lettered_total";
    pub const JOB_DURATION_SECONDS: &str = "clipo_job_duration_seconds";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "done").record(duration_secs);
}

pub fn record_job_failed(kind: &'static str, duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL, "kind" => kind).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}

pub fn record_job_retried() {
    counter!(names::JOBS_RETRIED_TOTAL).increment(1);
}

pub fn record_job_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}
