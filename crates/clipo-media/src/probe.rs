//! FFprobe duration inspection.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::command::{Tool, ToolRunner};
use crate::error::{MediaError, MediaResult};

/// Reads the total duration of a media file.
#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Duration in seconds. Always finite and non-negative on success.
    async fn inspect(&self, path: &Path) -> MediaResult<f64>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    /// FFprobe reports this as a string; some builds emit a number.
    duration: Option<Value>,
}

/// Parse `format.duration` out of `ffprobe -print_format json` output.
pub fn parse_duration(stdout: &[u8]) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let raw = probe
        .format
        .and_then(|f| f.duration)
        .ok_or(MediaError::MissingDuration)?;

    let duration = match &raw {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| MediaError::invalid_duration(s.clone()))?,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| MediaError::invalid_duration(n.to_string()))?,
        other => return Err(MediaError::invalid_duration(other.to_string())),
    };

    if !duration.is_finite() || duration < 0.0 {
        return Err(MediaError::invalid_duration(raw.to_string()));
    }

    Ok(duration)
}

/// `MediaInspector` backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeInspector {
    runner: ToolRunner,
}

impl FfprobeInspector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(Tool::Ffprobe).with_timeout(timeout),
        }
    }
}

impl Default for FfprobeInspector {
    fn default() -> Self {
        Self {
            runner: ToolRunner::new(Tool::Ffprobe),
        }
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    async fn inspect(&self, path: &Path) -> MediaResult<f64> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let mut args: Vec<OsString> = ["-v", "quiet", "-print_format", "json", "-show_format"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(path.as_os_str().to_os_string());

        let output = self.runner.run(args).await?;

        if !output.success() {
            let message = if output.stderr.is_empty() {
                format!("ffprobe exited with {}", output.status)
            } else {
                format!("ffprobe exited with {}: {}", output.status, output.stderr)
            };
            return Err(MediaError::ffprobe_failed(message, Some(output.stderr)));
        }

        let duration = parse_duration(&output.stdout)?;
        debug!("Probed {}: {:.3}s", path.display(), duration);
        Ok(duration)
    }
}
