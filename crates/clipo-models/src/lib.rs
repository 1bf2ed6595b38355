//! Shared data models for the Clipo media pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs flowing through the queue
//! - Records tracked by the record store and their status machine
//! - Client-facing record views
//! - Duration formatting and thumbnail naming rules

pub mod job;
pub mod media;
pub mod record;
pub mod view;

// Re-export common types
pub use job::{Job, JobId};
pub use media::{
    capture_timestamp, format_duration_display, thumbnail_file_name, Geometry,
    THUMBNAIL_CAPTURE_FRACTION, THUMBNAIL_HEIGHT, THUMBNAIL_WIDTH,
};
pub use record::{Record, RecordKey, RecordStatus, RecordUpdate, UnknownStatus};
pub use view::{RecordView, StatusView, DEFAULT_THUMBNAIL_URL_PREFIX};
