//! FFprobe/FFmpeg wrappers for media inspection.
//!
//! This crate provides:
//! - The `MediaInspector` and `ThumbnailExtractor` seams the pipeline calls
//! - FFprobe duration extraction
//! - FFmpeg single-frame thumbnail extraction
//! - A process runner with a bounded timeout that kills hung tools

pub mod command;
pub mod error;
pub mod probe;
pub mod thumbnail;

pub use command::{
    check_ffmpeg, check_ffprobe, FfmpegCommand, Tool, ToolOutput, ToolRunner, DEFAULT_TOOL_TIMEOUT,
};
pub use error::{MediaError, MediaResult};
pub use probe::{parse_duration, FfprobeInspector, MediaInspector};
pub use thumbnail::{FfmpegThumbnailer, ThumbnailExtractor};
