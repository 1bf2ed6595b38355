//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::record::RecordKey;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job to process one submitted media file.
///
/// Everything except `attempt_count` is fixed at submission time. The queue
/// bumps `attempt_count` each time the job is handed out again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub job_id: JobId,
    /// Key of the record this job drives
    pub record_key: RecordKey,
    /// Path of the uploaded file on disk
    pub input_path: PathBuf,
    /// Unique stored filename (thumbnail names derive from it)
    pub stored_name: String,
    /// Number of earlier deliveries of this job
    #[serde(default)]
    pub attempt_count: u32,
    /// When the job was first enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job for a freshly submitted record.
    pub fn new(
        record_key: RecordKey,
        input_path: impl Into<PathBuf>,
        stored_name: impl Into<String>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            record_key,
            input_path: input_path.into(),
            stored_name: stored_name.into(),
            attempt_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// 1-based number of the attempt this delivery represents.
    pub fn attempt(&self) -> u32 {
        self.attempt_count + 1
    }

    /// The same job as it will look on its next delivery.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt_count: self.attempt_count + 1,
            ..self.clone()
        }
    }

    /// Whether this delivery is a redelivery of an earlier attempt.
    pub fn is_redelivery(&self) -> bool {
        self.attempt_count > 0
    }
}
