use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Broker connection failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),

    #[error("Timed out connecting to broker at {address} after {timeout_ms} ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("Broker connection task stopped")]
    Closed,
}

/// Relay-level failures. None of these terminate the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("MQTT client not connected")]
    NotConnected,

    #[error("{0}")]
    PublishFailure(String),

    #[error("Invalid badge data: missing mac, latitude, or longitude")]
    InvalidPublishRequest,

    #[error("Invalid badge data: {0}")]
    InvalidCoordinates(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Request body failed field validation.
    #[error("Validation error: {}", summarize(.0))]
    InvalidFields(Vec<ValidationDetail>),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg, None),
            ApiError::InvalidFields(details) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                summarize(&details),
                Some(details),
            ),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg, None)
            }
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// The single field message, or a count when several fields failed.
fn summarize(details: &[ValidationDetail]) -> String {
    match details {
        [only] => only.message.clone(),
        _ => format!("{} validation errors", details.len()),
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::InvalidFields(details)
    }
}

impl From<domain::services::ReconcileError> for ApiError {
    fn from(err: domain::services::ReconcileError) -> Self {
        ApiError::Validation(err.to_string())
    }
}
