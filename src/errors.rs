use crate::models::KeyError;
use crate::services::{
    browser::SessionError,
    gateway::{FailureKind, GatewayError},
    local_backend::StorageError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Failure tag for clients that branch on the kind of error.
    pub kind: &'static str,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            kind,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "kind": self.kind,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let (status, kind) = match err.kind() {
            FailureKind::Network => (StatusCode::BAD_GATEWAY, "network_error"),
            FailureKind::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            FailureKind::QuotaExceeded => (StatusCode::INSUFFICIENT_STORAGE, "quota_exceeded"),
            FailureKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        };
        AppError::new(status, kind, err.to_string())
    }
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        AppError::new(StatusCode::BAD_REQUEST, "invalid_key", err.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Gateway(err) => err.into(),
            SessionError::InvalidKey(err) => err.into(),
            SessionError::UploadInProgress(_) => {
                AppError::new(StatusCode::CONFLICT, "upload_in_progress", err.to_string())
            }
            SessionError::NoFileSelected => AppError::bad_request(err.to_string()),
            SessionError::UploadAborted(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        GatewayError::from(err).into()
    }
}
