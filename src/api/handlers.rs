use axum::{http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::storage::Storage;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub config: Arc<Config>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            message: None,
        }),
    )
}

pub fn api_error_with_message(
    status: StatusCode,
    error: impl Into<String>,
    message: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            message: Some(message.into()),
        }),
    )
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
