//! Processing records and their status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobId;
use crate::media::format_duration_display;

/// Opaque key of a record in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(pub String);

impl RecordKey {
    /// Generate a new random record key.
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

impl Default for RecordKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Submitted, waiting for a worker
    #[default]
    Pending,
    /// A worker is running the pipeline
    Processing,
    /// Duration and thumbnail extracted
    Done,
    /// Most recent attempt failed (may still be retried)
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Processing => "processing",
            RecordStatus::Done => "done",
            RecordStatus::Failed => "failed",
        }
    }

    /// Check if this is the end of an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Done | RecordStatus::Failed)
    }

    /// Legal edges of the status machine.
    ///
    /// `Failed -> Pending` is the retry re-arm; nothing else moves backwards.
    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Pending, RecordStatus::Processing)
                | (RecordStatus::Processing, RecordStatus::Done)
                | (RecordStatus::Processing, RecordStatus::Failed)
                | (RecordStatus::Failed, RecordStatus::Pending)
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status string that is not one of the four known values.
#[derive(Debug, Clone, Error)]
#[error("unknown record status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RecordStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "processing" => Ok(RecordStatus::Processing),
            "done" => Ok(RecordStatus::Done),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One submitted media file and what processing found out about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record key
    pub key: RecordKey,

    /// Filename as uploaded by the client
    pub original_filename: String,

    /// Unique filename the upload was stored under
    pub stored_name: String,

    /// Full path of the stored upload
    pub stored_path: PathBuf,

    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,

    /// Processing status
    #[serde(default)]
    pub status: RecordStatus,

    /// Duration in seconds (set on done)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    /// Duration as HH:MM:SS (set on done)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_display: Option<String>,

    /// Thumbnail filename (set on done)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_reference: Option<String>,

    /// When the last attempt finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Error of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Job ID that processes this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_reference: Option<String>,

    /// 1-based attempt that last wrote this record (0 before any attempt)
    #[serde(default)]
    pub attempt: u32,

    /// Deliveries left after a failed attempt; 0 means the failure is final
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl Record {
    /// Create a pending record for a stored upload.
    pub fn new(original_filename: impl Into<String>, stored_path: impl Into<PathBuf>) -> Self {
        let stored_path = stored_path.into();
        let stored_name = stored_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| stored_path.to_string_lossy().into_owned());

        Self {
            key: RecordKey::new(),
            original_filename: original_filename.into(),
            stored_name,
            stored_path,
            submitted_at: Utc::now(),
            status: RecordStatus::Pending,
            duration_seconds: None,
            duration_display: None,
            thumbnail_reference: None,
            processed_at: None,
            error_message: None,
            task_reference: None,
            attempt: 0,
            attempts_remaining: None,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &RecordUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(value) = &update.duration_seconds {
            self.duration_seconds = *value;
        }
        if let Some(value) = &update.duration_display {
            self.duration_display = value.clone();
        }
        if let Some(value) = &update.thumbnail_reference {
            self.thumbnail_reference = value.clone();
        }
        if let Some(value) = &update.processed_at {
            self.processed_at = *value;
        }
        if let Some(value) = &update.error_message {
            self.error_message = value.clone();
        }
        if let Some(value) = &update.task_reference {
            self.task_reference = value.clone();
        }
        if let Some(attempt) = update.attempt {
            self.attempt = attempt;
        }
        if let Some(value) = &update.attempts_remaining {
            self.attempts_remaining = *value;
        }
    }

    /// Whether the failure recorded here will not be retried.
    pub fn is_permanently_failed(&self) -> bool {
        self.status == RecordStatus::Failed && self.attempts_remaining == Some(0)
    }
}

/// Partial update of a record, written atomically by the store.
///
/// Each optional slot is `None` to leave the field alone, `Some(Some(v))` to
/// set it and `Some(None)` to clear it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub duration_seconds: Option<Option<f64>>,
    pub duration_display: Option<Option<String>>,
    pub thumbnail_reference: Option<Option<String>>,
    pub processed_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
    pub task_reference: Option<Option<String>>,
    pub attempt: Option<u32>,
    pub attempts_remaining: Option<Option<u32>>,
}

impl RecordUpdate {
    /// `pending -> processing` at the start of an attempt.
    pub fn processing(attempt: u32) -> Self {
        Self {
            status: Some(RecordStatus::Processing),
            attempt: Some(attempt),
            ..Default::default()
        }
    }

    /// `failed -> pending` when a retry picks the record up again.
    pub fn rearm() -> Self {
        Self {
            status: Some(RecordStatus::Pending),
            error_message: Some(None),
            attempts_remaining: Some(None),
            ..Default::default()
        }
    }

    /// `processing -> done` with everything the pipeline extracted.
    pub fn done(duration_seconds: f64, thumbnail_reference: impl Into<String>, attempt: u32) -> Self {
        Self {
            status: Some(RecordStatus::Done),
            duration_seconds: Some(Some(duration_seconds)),
            duration_display: Some(Some(format_duration_display(duration_seconds))),
            thumbnail_reference: Some(Some(thumbnail_reference.into())),
            processed_at: Some(Some(Utc::now())),
            error_message: Some(None),
            attempt: Some(attempt),
            attempts_remaining: Some(None),
            ..Default::default()
        }
    }

    /// `processing -> failed` with the error of this attempt.
    pub fn failed(error_message: impl Into<String>, attempt: u32, attempts_remaining: u32) -> Self {
        Self {
            status: Some(RecordStatus::Failed),
            processed_at: Some(Some(Utc::now())),
            error_message: Some(Some(error_message.into())),
            attempt: Some(attempt),
            attempts_remaining: Some(Some(attempts_remaining)),
            ..Default::default()
        }
    }

    /// Link the record to the job processing it.
    pub fn task_reference(job_id: &JobId) -> Self {
        Self {
            task_reference: Some(Some(job_id.to_string())),
            ..Default::default()
        }
    }

    /// True if applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = Record::new("holiday.mp4", "/uploads/1234.mp4");
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.stored_name, "1234.mp4");
        assert_eq!(record.attempt, 0);
        assert!(record.duration_seconds.is_none());
        assert!(record.error_message.is_none());
    }

    #[test]
    fn test_status_machine_edges() {
        use RecordStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Done));
        assert!(!Done.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            RecordStatus::Pending,
            RecordStatus::Processing,
            RecordStatus::Done,
            RecordStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RecordStatus>().unwrap(), status);
        }
        assert!("dead".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn test_done_update_sets_results_and_clears_error() {
        let mut record = Record::new("a.mp4", "/uploads/a.mp4");
        record.apply(&RecordUpdate::processing(1));
        record.apply(&RecordUpdate::failed("ffprobe exploded", 1, 2));
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("ffprobe exploded"));
        assert_eq!(record.attempts_remaining, Some(2));

        record.apply(&RecordUpdate::rearm());
        assert_eq!(record.status, RecordStatus::Pending);
        assert!(record.error_message.is_none());

        record.apply(&RecordUpdate::processing(2));
        record.apply(&RecordUpdate::done(120.0, "thumb_a.jpg", 2));
        assert_eq!(record.status, RecordStatus::Done);
        assert_eq!(record.duration_display.as_deref(), Some("00:02:00"));
        assert_eq!(record.thumbnail_reference.as_deref(), Some("thumb_a.jpg"));
        assert!(record.processed_at.is_some());
        assert!(record.error_message.is_none());
        assert!(record.attempts_remaining.is_none());
        assert_eq!(record.attempt, 2);
    }

    #[test]
    fn test_permanent_failure_flag() {
        let mut record = Record::new("a.mp4", "/uploads/a.mp4");
        record.apply(&RecordUpdate::failed("boom", 3, 0));
        assert!(record.is_permanently_failed());

        record.apply(&RecordUpdate::failed("boom", 2, 1));
        assert!(!record.is_permanently_failed());
    }

    #[test]
    fn test_empty_update() {
        assert!(RecordUpdate::default().is_empty());
        assert!(!RecordUpdate::task_reference(&JobId::new()).is_empty());
    }
}
