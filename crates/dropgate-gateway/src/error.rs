//! HTTP error response conversion
//!
//! Wraps `UploadError` so it can render as an axum response with the
//! envelope `{error, code}`, the kind's status code and log level.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dropgate_core::{LogLevel, UploadError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error code for programmatic handling
    pub code: String,
}

/// Wrapper type for UploadError to implement IntoResponse
/// This is necessary because of Rust's orphan rules - we can't implement
/// IntoResponse (external trait) for UploadError (external type from
/// dropgate-core)
#[derive(Debug)]
pub struct HttpUploadError(pub UploadError);

impl From<UploadError> for HttpUploadError {
    fn from(err: UploadError) -> Self {
        HttpUploadError(err)
    }
}

fn log_error(error: &UploadError) {
    let code = error.error_code();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, code, "Upload error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, code, "Upload error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, code, "Upload error occurred");
        }
    }
}

impl IntoResponse for HttpUploadError {
    fn into_response(self) -> Response {
        let error = &self.0;
        let status = StatusCode::from_u16(error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(error);

        let body = Json(ErrorResponse {
            error: error.to_string(),
            code: error.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_large_renders_413() {
        let response = HttpUploadError(UploadError::FileTooLarge).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_storage_unavailable_renders_503() {
        let response = HttpUploadError(UploadError::StorageUnavailable).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Verifies the public error contract: serialized ErrorResponse carries
    /// "error" and "code".
    #[test]
    fn test_error_response_shape() {
        let body = ErrorResponse {
            error: "the file is too large".to_string(),
            code: "FILE_TOO_LARGE".to_string(),
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            json.get("code").and_then(|v| v.as_str()),
            Some("FILE_TOO_LARGE")
        );
        assert!(json.get("error").and_then(|v| v.as_str()).is_some());
    }
}
