//! HTTP error responses for the LiveMark server.
//!
//! Handlers return [`ApiError`], which renders as a status code plus a JSON
//! body of the form `{"error": "...", "code": "..."}`. Core errors are mapped
//! through [`From<CoreError>`] so `?` works directly in handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use livemark_core::{BoundaryError, CoreError, WatchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A request that could not be served.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request was malformed or named the wrong kind of entry.
    #[error("{message}")]
    BadRequest {
        message: String,
        code: &'static str,
    },

    /// The path escapes the boundary or is not in the index.
    #[error("{message}")]
    Forbidden {
        message: String,
        code: &'static str,
    },

    /// The path does not exist.
    #[error("{message}")]
    NotFound {
        message: String,
        code: &'static str,
    },

    /// Something failed on our side. The message is logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, code: &'static str) -> Self {
        Self::BadRequest {
            message: message.into(),
            code,
        }
    }

    pub fn forbidden(message: impl Into<String>, code: &'static str) -> Self {
        Self::Forbidden {
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            code: "not_found",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::BadRequest { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. } => Some(code),
            Self::Internal(_) => None,
        }
    }
}

impl From<BoundaryError> for ApiError {
    fn from(err: BoundaryError) -> Self {
        match err {
            BoundaryError::OutsideBoundary(_) => {
                Self::forbidden(err.to_string(), "outside_boundary")
            }
            BoundaryError::Unresolvable { .. } => Self::not_found(err.to_string()),
            BoundaryError::InvalidRoot(_) | BoundaryError::NoHomeDirectory => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Boundary(inner) | CoreError::Watch(WatchError::Boundary(inner)) => {
                inner.into()
            }
            CoreError::NotADirectory(_) => Self::bad_request(err.to_string(), "not_a_directory"),
            CoreError::NotListed(_) => Self::forbidden(err.to_string(), "not_listed"),
            CoreError::Watch(WatchError::InvalidTarget(_)) => {
                Self::bad_request(err.to_string(), "invalid_target")
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Internal(message) => {
                error!(error = %message, "Request failed");
                ErrorResponse::new("internal server error")
            }
            other => {
                let response = ErrorResponse::new(other.to_string());
                match other.code() {
                    Some(code) => response.with_code(code),
                    None => response,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn error_response_serializes_without_code() {
        let json = serde_json::to_string(&ErrorResponse::new("test error")).unwrap();
        assert_eq!(json, r#"{"error":"test error"}"#);
    }

    #[test]
    fn error_response_serializes_with_code() {
        let json =
            serde_json::to_string(&ErrorResponse::new("test error").with_code("test_code"))
                .unwrap();
        assert_eq!(json, r#"{"error":"test error","code":"test_code"}"#);
    }

    #[test]
    fn boundary_errors_map_to_client_statuses() {
        let outside: ApiError =
            CoreError::from(BoundaryError::OutsideBoundary(PathBuf::from("/etc"))).into();
        assert_eq!(outside.status(), StatusCode::FORBIDDEN);
        assert_eq!(outside.code(), Some("outside_boundary"));

        let missing: ApiError = CoreError::from(BoundaryError::Unresolvable {
            path: PathBuf::from("/home/u/missing"),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
        .into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let wrapped: ApiError = CoreError::Watch(WatchError::Boundary(
            BoundaryError::OutsideBoundary(PathBuf::from("/tmp")),
        ))
        .into();
        assert_eq!(wrapped.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn index_rejections_map_to_client_statuses() {
        let not_dir: ApiError = CoreError::NotADirectory(PathBuf::from("a.md")).into();
        assert_eq!(not_dir.status(), StatusCode::BAD_REQUEST);
        assert_eq!(not_dir.code(), Some("not_a_directory"));

        let unlisted: ApiError = CoreError::NotListed(PathBuf::from("secret.md")).into();
        assert_eq!(unlisted.status(), StatusCode::FORBIDDEN);
        assert_eq!(unlisted.code(), Some("not_listed"));
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = ApiError::Internal("disk on fire".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, ErrorResponse::new("internal server error"));
    }
}
