//! Upload and record query handlers.

use std::path::Path;

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use clipo_models::{RecordKey, RecordView, StatusView};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Response to a successful upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    pub filename: String,
    pub message: String,
}

/// All records, newest first.
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoList {
    pub videos: Vec<RecordView>,
}

/// Store an uploaded video and queue it for processing.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(FILE_FIELD) {
            return accept_upload(&state, field).await.map(Json);
        }
    }

    metrics::record_upload_rejected("missing_file");
    Err(ApiError::bad_request("No file provided"))
}

async fn accept_upload(state: &AppState, field: Field<'_>) -> ApiResult<UploadResponse> {
    let is_video = field
        .content_type()
        .map(|ct| ct.starts_with("video/"))
        .unwrap_or(false);
    if !is_video {
        metrics::record_upload_rejected("content_type");
        return Err(ApiError::bad_request("Only video files are allowed"));
    }

    let filename = field.file_name().unwrap_or_default().to_string();
    let stored_name = stored_file_name(&filename);
    let path = state.config.upload_dir.join(&stored_name);

    let bytes = match save_field(field, &path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove partial upload {}: {}", path.display(), cleanup);
            }
            return Err(e);
        }
    };
    metrics::record_upload(bytes);

    let submission = state
        .service
        .submit(&path, &filename)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to upload video: {}", e)))?;

    info!(
        record_key = %submission.record_key,
        job_id = %submission.job_id,
        "Video uploaded: {} ({} bytes) as {}",
        filename,
        bytes,
        stored_name
    );

    Ok(UploadResponse {
        id: submission.record_key.to_string(),
        filename,
        message: "Video uploaded successfully. Processing started.".to_string(),
    })
}

/// Stream a multipart field to `path`, returning the number of bytes written.
async fn save_field(mut field: Field<'_>, path: &Path) -> ApiResult<u64> {
    let io_error = |e: std::io::Error| ApiError::internal(format!("Failed to upload video: {}", e));

    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut written = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_error)?;

    Ok(written)
}

/// `<uuid><ext>`, keeping only the extension of the client's filename.
pub fn stored_file_name(original: &str) -> String {
    let id = Uuid::new_v4();
    match Path::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", id, ext),
        _ => id.to_string(),
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        metrics::record_upload_rejected("too_large");
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::bad_request(e.body_text())
    }
}

/// Record keys are UUIDs; anything else is rejected before touching the store.
fn parse_record_key(id: &str) -> ApiResult<RecordKey> {
    Uuid::parse_str(id)
        .map(|uuid| RecordKey::from_string(uuid.to_string()))
        .map_err(|_| ApiError::bad_request("Invalid video ID format"))
}

/// Current processing status of a video.
pub async fn get_video_status(
    State(state): State<AppState>,
    UrlPath(video_id): UrlPath<String>,
) -> ApiResult<Json<StatusView>> {
    let key = parse_record_key(&video_id)?;
    let status = state.service.get_status(&key).await?;
    Ok(Json(StatusView::new(&key, status)))
}

/// Full metadata of a video.
pub async fn get_video_metadata(
    State(state): State<AppState>,
    UrlPath(video_id): UrlPath<String>,
) -> ApiResult<Json<RecordView>> {
    let key = parse_record_key(&video_id)?;
    Ok(Json(state.service.get_metadata(&key).await?))
}

/// Every video, newest upload first.
pub async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<VideoList>> {
    let videos = state.service.list_all().await?;
    Ok(Json(VideoList { videos }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_file_name_keeps_extension() {
        let name = stored_file_name("holiday.final.MP4");
        assert!(name.ends_with(".MP4"));
        assert!(Uuid::parse_str(name.trim_end_matches(".MP4")).is_ok());

        let bare = stored_file_name("recording");
        assert!(Uuid::parse_str(&bare).is_ok());

        let sneaky = stored_file_name("../../etc/passwd.mov");
        assert!(!sneaky.contains('/'));
        assert!(sneaky.ends_with(".mov"));
    }

    #[test]
    fn test_parse_record_key() {
        let key = parse_record_key("550E8400-E29B-41D4-A716-446655440000").unwrap();
        assert_eq!(key.as_str(), "550e8400-e29b-41d4-a716-446655440000");
        assert!(matches!(
            parse_record_key("not-an-id"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
