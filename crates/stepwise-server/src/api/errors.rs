//! Error responses for the Stepwise API
//!
//! Every failure leaves the server as a JSON `{name, message, detail?}` body
//! where `message` is the stable error code.

use axum::{http::StatusCode, response::IntoResponse, Json};
use stepwise_core::{CoreError, ErrorPayload};
use tracing::error;

use crate::error::ServerError;

/// API error type for returning standard error responses
#[derive(Debug)]
pub enum ApiError {
    /// Unparseable body (400)
    BadRequest(String),
    /// Unknown route (404)
    NotFound(String),
    /// Wrapped runtime error
    Core(CoreError),
    /// Wrapped server error
    Server(ServerError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        ApiError::Server(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Core(err) => write!(f, "{}", err),
            ApiError::Server(err) => write!(f, "{}", err),
        }
    }
}

/// HTTP status for a stable error code
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "instance.not_found" | "workflow.not_found" | "route.not_found" => StatusCode::NOT_FOUND,
        "instance.invalid_id" | "request.invalid" => StatusCode::BAD_REQUEST,
        "instance.invalid_transition" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn payload(&self) -> ErrorPayload {
        match self {
            ApiError::BadRequest(msg) => ErrorPayload {
                name: "Error".to_string(),
                message: "request.invalid".to_string(),
                detail: Some(msg.clone()),
            },
            ApiError::NotFound(what) => ErrorPayload {
                name: "Error".to_string(),
                message: "route.not_found".to_string(),
                detail: Some(format!("{} not found", what)),
            },
            ApiError::Core(err) => ErrorPayload::from(err),
            ApiError::Server(err) => ErrorPayload {
                name: "Error".to_string(),
                message: err.code().to_string(),
                detail: Some(err.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = self.payload();
        let status = status_for_code(&payload.message);
        if status.is_server_error() {
            error!(code = %payload.message, error = %self, "Request failed");
        }
        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_code("instance.not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("workflow.not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("instance.invalid_id"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("request.invalid"), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for_code("log.append_failed"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_core_error_payload_carries_code() {
        let err = ApiError::from(CoreError::InstanceNotFound("missing".to_string()));
        let payload = err.payload();
        assert_eq!(payload.name, "Error");
        assert_eq!(payload.message, "instance.not_found");
        assert!(payload.detail.unwrap().contains("missing"));
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::BadRequest("expected object".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
