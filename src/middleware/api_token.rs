use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::SharedState;

/// Require `Authorization: Bearer <token>` when an API token is configured.
pub async fn require_api_token(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_token.as_deref() else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            next.run(req).await
        }
        Some(_) => AppError::Unauthorized("Invalid API token".to_string()).into_response(),
        None => AppError::Unauthorized("Missing API token".to_string()).into_response(),
    }
}
