//! HTTP error mapping for pool failures.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ipblock_pool::Error;

/// Error wrapper converting pool errors into HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::BlockNotFound => (StatusCode::NOT_FOUND, "not_found"),
            Error::PoolExhausted { .. } => (StatusCode::CONFLICT, "exhausted"),
            Error::InvalidAddress(_) | Error::InvalidConfig(_) => {
                (StatusCode::BAD_REQUEST, "bad_data")
            }
            Error::Store { .. } | Error::Codec(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }

        let body = serde_json::json!({
            "status": "error",
            "errorType": error_type,
            "error": self.0.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}
