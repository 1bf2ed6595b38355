//! Liveness and readiness handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

/// Root liveness message.
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Clipo media processing API is running!" }))
}

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub queue_length: Option<usize>,
    pub dead_letters: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness check endpoint: the queue must answer.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let queue = state.queue();
    let checked: Result<(usize, usize), clipo_queue::QueueError> = async {
        let length = queue.len().await?;
        let dead = queue.dead_letter_len().await?;
        Ok((length, dead))
    }
    .await;

    match checked {
        Ok((length, dead)) => Ok(Json(ReadinessResponse {
            status: "ready".to_string(),
            queue_length: Some(length),
            dead_letters: Some(dead),
            error: None,
        })),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "degraded".to_string(),
                queue_length: None,
                dead_letters: None,
                error: Some(e.to_string()),
            }),
        )),
    }
}
