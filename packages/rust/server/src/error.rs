//! API error type with `{"error": "..."}` JSON bodies.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use deepresearch_shared::DeepResearchError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Overloaded(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, detail),
            ApiError::Overloaded(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<DeepResearchError> for ApiError {
    fn from(err: DeepResearchError) -> Self {
        match err {
            DeepResearchError::TaskNotFound(_) => ApiError::NotFound("Task not found".into()),
            DeepResearchError::TaskBusy(_) => {
                ApiError::Conflict("Task already has a subscriber".into())
            }
            e @ DeepResearchError::Overloaded { .. } => ApiError::Overloaded(e.to_string()),
            DeepResearchError::Validation { message } => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_statuses() {
        let cases = [
            (DeepResearchError::TaskNotFound("x".into()), StatusCode::NOT_FOUND),
            (DeepResearchError::TaskBusy("x".into()), StatusCode::CONFLICT),
            (
                DeepResearchError::Overloaded { capacity: 4 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (DeepResearchError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                DeepResearchError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
