//! Thumbnail generation.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::command::{FfmpegCommand, Tool, ToolRunner};
use crate::error::{MediaError, MediaResult};
use clipo_models::Geometry;

/// Extracts a single still frame from a media file.
#[async_trait]
pub trait ThumbnailExtractor: Send + Sync {
    /// Write the frame at `timestamp_seconds` to `output_path`, scaled to `geometry`.
    async fn extract(
        &self,
        input_path: &Path,
        timestamp_seconds: f64,
        output_path: &Path,
        geometry: Geometry,
    ) -> MediaResult<()>;
}

/// `ThumbnailExtractor` backed by the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    runner: ToolRunner,
}

impl FfmpegThumbnailer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(Tool::Ffmpeg).with_timeout(timeout),
        }
    }

    fn command(
        input_path: &Path,
        timestamp_seconds: f64,
        output_path: &Path,
        geometry: Geometry,
    ) -> FfmpegCommand {
        FfmpegCommand::new(input_path, output_path)
            .seek(timestamp_seconds)
            .single_frame()
            .video_filter(geometry.scale_filter())
            .quality(2)
            .log_level("error")
    }
}

impl Default for FfmpegThumbnailer {
    fn default() -> Self {
        Self {
            runner: ToolRunner::new(Tool::Ffmpeg),
        }
    }
}

#[async_trait]
impl ThumbnailExtractor for FfmpegThumbnailer {
    async fn extract(
        &self,
        input_path: &Path,
        timestamp_seconds: f64,
        output_path: &Path,
        geometry: Geometry,
    ) -> MediaResult<()> {
        if !input_path.exists() {
            return Err(MediaError::FileNotFound(input_path.to_path_buf()));
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cmd = Self::command(input_path, timestamp_seconds, output_path, geometry);
        let output = self.runner.run(cmd.build_args()).await?;

        if !output.success() {
            let message = if output.stderr.is_empty() {
                format!("ffmpeg exited with {}", output.status)
            } else {
                format!("ffmpeg exited with {}: {}", output.status, output.stderr)
            };
            return Err(MediaError::ffmpeg_failed(
                message,
                Some(output.stderr),
                output.status.code(),
            ));
        }

        // Seeking past the last frame exits 0 without writing anything.
        if !output_path.exists() {
            return Err(MediaError::ffmpeg_failed(
                format!("no frame written at {:.3}s", timestamp_seconds),
                None,
                output.status.code(),
            ));
        }

        debug!(
            "Thumbnail {} ({}) from {} at {:.3}s",
            output_path.display(),
            geometry,
            input_path.display(),
            timestamp_seconds
        );
        Ok(())
    }
}
