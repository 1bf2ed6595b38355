//! Duration display and thumbnail naming rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Thumbnail capture point as a fraction of total duration.
pub const THUMBNAIL_CAPTURE_FRACTION: f64 = 0.1;

/// Thumbnail generation settings
pub const THUMBNAIL_WIDTH: u32 = 320;
pub const THUMBNAIL_HEIGHT: u32 = 240;
pub const THUMBNAIL_PREFIX: &str = "thumb_";
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Output size of an extracted thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// FFmpeg scale filter for this geometry.
    pub fn scale_filter(&self) -> String {
        format!("scale={}:{}", self.width, self.height)
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Format a duration as `HH:MM:SS`.
///
/// Fractional seconds are truncated, never rounded. Negative or non-finite
/// input formats as zero.
///
/// # Examples
/// ```
/// use clipo_models::format_duration_display;
/// assert_eq!(format_duration_display(3725.9), "01:02:05");
/// assert_eq!(format_duration_display(120.0), "00:02:00");
/// ```
pub fn format_duration_display(duration_seconds: f64) -> String {
    let total = if duration_seconds.is_finite() && duration_seconds > 0.0 {
        duration_seconds.trunc() as u64
    } else {
        0
    };

    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Timestamp (seconds) at which the thumbnail is captured.
pub fn capture_timestamp(duration_seconds: f64) -> f64 {
    duration_seconds * THUMBNAIL_CAPTURE_FRACTION
}

/// Thumbnail filename for a stored upload: `thumb_<stem>.jpg`.
///
/// The stem drops only the last extension, so `a.b.mp4` becomes `thumb_a.b.jpg`.
pub fn thumbnail_file_name(stored_name: &str) -> String {
    let stem = Path::new(stored_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| stored_name.to_string());

    format!("{}{}.{}", THUMBNAIL_PREFIX, stem, THUMBNAIL_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_display_truncates() {
        assert_eq!(format_duration_display(3725.9), "01:02:05");
        assert_eq!(format_duration_display(59.999), "00:00:59");
        assert_eq!(format_duration_display(0.0), "00:00:00");
    }

    #[test]
    fn test_duration_display_long_media() {
        assert_eq!(format_duration_display(36000.0), "10:00:00");
        assert_eq!(format_duration_display(360000.5), "100:00:00");
    }

    #[test]
    fn test_duration_display_degenerate_input() {
        assert_eq!(format_duration_display(-3.0), "00:00:00");
        assert_eq!(format_duration_display(f64::NAN), "00:00:00");
    }

    #[test]
    fn test_capture_timestamp_is_ten_percent() {
        assert_eq!(capture_timestamp(100.0), 10.0);
        assert_eq!(capture_timestamp(120.0), 12.0);
        assert_eq!(capture_timestamp(0.0), 0.0);
    }

    #[test]
    fn test_thumbnail_file_name() {
        assert_eq!(
            thumbnail_file_name("4f1c2a9e-0000-4000-8000-000000000000.mp4"),
            "thumb_4f1c2a9e-0000-4000-8000-000000000000.jpg"
        );
        assert_eq!(thumbnail_file_name("clip.final.mov"), "thumb_clip.final.jpg");
        assert_eq!(thumbnail_file_name("noext"), "thumb_noext.jpg");
    }

    #[test]
    fn test_geometry_defaults() {
        let geometry = Geometry::default();
        assert_eq!(geometry.scale_filter(), "scale=320:240");
        assert_eq!(geometry.to_string(), "320x240");
    }
}
