//! API request handlers

pub mod campaigns;
pub mod health;
pub mod sequences;

use axum::{http::StatusCode, Json};
use dripmail_common::types::FieldViolation;
use dripmail_common::Error;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldViolation>,
}

/// Handler error type
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a shared error to a response. Storage and internal failures are
/// logged and reported without their detail.
pub fn api_error(e: impl Into<Error>) -> ApiError {
    let e = e.into();
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let message = if status.is_server_error() {
        error!("Request failed: {}", e);
        "Internal server error".to_string()
    } else {
        e.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            error: e.code().to_lowercase(),
            message,
            details: Vec::new(),
        }),
    )
}

/// 422 response carrying field-level problems
pub fn validation_failed(details: Vec<FieldViolation>) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: "validation_error".to_string(),
            message: "Request validation failed".to_string(),
            details,
        }),
    )
}

/// 404 response for a missing resource
pub fn not_found(what: impl std::fmt::Display) -> ApiError {
    api_error(Error::NotFound(what.to_string()))
}
