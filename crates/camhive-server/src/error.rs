use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use camhive_core::InferenceError;
use serde_json::json;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Inference(e) if e.is_client_error() => {
                (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD")
            }
            ApiError::Inference(InferenceError::Classification(_)) => {
                (StatusCode::BAD_GATEWAY, "CLASSIFICATION_FAILED")
            }
            ApiError::Inference(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error_code, "{message}");
        } else {
            tracing::debug!(error_code, "{message}");
        }

        (
            status,
            Json(json!({ "error_code": error_code, "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_inference_errors_to_status() {
        let bad = ApiError::from(InferenceError::InvalidPayload("no image".into()));
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let upstream = ApiError::from(InferenceError::Classification(anyhow::anyhow!("timeout")));
        assert_eq!(upstream.into_response().status(), StatusCode::BAD_GATEWAY);

        let storage = ApiError::from(InferenceError::Storage(anyhow::anyhow!("disk full")));
        assert_eq!(
            storage.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_is_404() {
        let resp = ApiError::NotFound("device cam9".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
