//! Client-facing views of records.

use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordKey, RecordStatus};

/// URL prefix thumbnails are served under.
pub const DEFAULT_THUMBNAIL_URL_PREFIX: &str = "/thumbnails";

/// Status-only view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub id: String,
    pub status: RecordStatus,
}

impl StatusView {
    pub fn new(key: &RecordKey, status: RecordStatus) -> Self {
        Self {
            id: key.to_string(),
            status,
        }
    }
}

/// Full metadata view of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: String,
    pub filename: String,
    pub upload_time: String,
    pub status: RecordStatus,
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<u32>,
}

impl RecordView {
    /// Build the view, deriving the thumbnail URL from the stored reference.
    pub fn from_record(record: &Record, thumbnail_url_prefix: &str) -> Self {
        Self {
            id: record.key.to_string(),
            filename: record.original_filename.clone(),
            upload_time: record.submitted_at.to_rfc3339(),
            status: record.status,
            duration: record.duration_display.clone(),
            duration_seconds: record.duration_seconds,
            thumbnail_url: record
                .thumbnail_reference
                .as_deref()
                .map(|reference| thumbnail_url(thumbnail_url_prefix, reference)),
            processed_at: record.processed_at.map(|t| t.to_rfc3339()),
            error_message: record.error_message.clone(),
            attempts_remaining: record.attempts_remaining,
        }
    }
}

/// Join the URL prefix and a thumbnail filename.
pub fn thumbnail_url(prefix: &str, reference: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), reference)
}
