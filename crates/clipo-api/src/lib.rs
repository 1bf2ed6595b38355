//! Axum HTTP API.
//!
//! This crate provides:
//! - Multipart upload that stores the file and submits it for processing
//! - Status, metadata and listing endpoints over the record store
//! - Static thumbnail serving
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
