//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use crate::accounts::{LoginError, StoreError};
use crate::scheduler::JobError;

/// Error returned by every handler, rendered as `{success:false, message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed ({}): {}", self.status, self.message);
        } else {
            warn!("Request rejected ({}): {}", self.status, self.message);
        }

        (
            self.status,
            Json(json!({
                "success": false,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        let message = err.to_string();
        match err {
            LoginError::MissingPhone
            | LoginError::NoPendingLogin
            | LoginError::PasswordRequired
            | LoginError::InvalidCode
            | LoginError::CodeExpired
            | LoginError::InvalidPassword => Self::validation(message),
            LoginError::AlreadyRegistered(_) => Self::conflict(message),
            LoginError::RateLimited { .. } => Self::rate_limited(message),
            LoginError::Store(store) => store.into(),
            LoginError::VerificationFailed(_) | LoginError::SendFailed(_) => Self::internal(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::DuplicatePhone(_) => Self::conflict(message),
            StoreError::NotFound(_) => Self::not_found("Account not found"),
            StoreError::Io(_) | StoreError::Parse(_) => Self::internal(message),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let message = err.to_string();
        match err {
            JobError::NotFound(_) => Self::not_found(message),
            JobError::NotCancellable { .. } => Self::conflict(message),
        }
    }
}
