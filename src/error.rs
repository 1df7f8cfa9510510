use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Failures raised by the queue engine itself.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("queue is administratively disabled")]
    Disabled,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Failures reported by the external batch API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Network failure, timeout, rate limiting or a 5xx.
    #[error("transient API error: {0}")]
    Transient(String),

    /// A 4xx the provider will keep returning for the same request.
    #[error("API rejected request ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("malformed API response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_permanent_status(status) {
            ApiError::Permanent { status, message }
        } else {
            ApiError::Transient(format!("HTTP {status}: {message}"))
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ApiError::from_status(status.as_u16(), err.to_string()),
            None => ApiError::Transient(err.to_string()),
        }
    }
}

/// 4xx codes other than request timeout and rate limiting.
pub fn is_permanent_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    BadRequest(String),
    Queue(QueueError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::Queue(err) => write!(f, "Queue Error: {err}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Queue(QueueError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
            AppError::Queue(QueueError::Disabled) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Queue is disabled".to_string(),
            ),
            AppError::Queue(err) => {
                tracing::error!("Queue error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::Queue(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_timeouts_are_transient() {
        assert!(matches!(ApiError::from_status(429, "slow down"), ApiError::Transient(_)));
        assert!(matches!(ApiError::from_status(408, "timeout"), ApiError::Transient(_)));
        assert!(matches!(ApiError::from_status(503, "down"), ApiError::Transient(_)));
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_eq!(
            ApiError::from_status(400, "Invalid Resource"),
            ApiError::Permanent {
                status: 400,
                message: "Invalid Resource".to_string()
            }
        );
        assert!(is_permanent_status(404));
        assert!(!is_permanent_status(200));
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let resp = AppError::from(QueueError::Validation("audience_id is required".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::from(QueueError::Disabled).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = AppError::BadRequest("hours out of range".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
