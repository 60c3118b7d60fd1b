//! Application error types.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::http::header::{HeaderValue, WWW_AUTHENTICATE};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ivywhiz_core::auth::AuthError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Body sent with every 500.
pub const SERVER_ERROR_MESSAGE: &str =
    "The server encountered an error and was unable to process your request";

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid or missing authentication token")]
    InvalidToken,

    #[error("You must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("Your account must be activated to access this resource")]
    InactiveAccount,

    #[error("You do not have permission to access this resource")]
    PermissionDenied,

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("The requested resource could not be found")]
    NotFound,

    #[error("too many requests, please try again later")]
    RateLimited,

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    /// One-field validation failure.
    pub fn field(field: &str, message: &str) -> Self {
        AppError::FailedValidation(BTreeMap::from([(field.to_string(), message.to_string())]))
    }

    /// Stable identifier for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidToken => "invalid_token",
            AppError::AuthenticationRequired => "authentication_required",
            AppError::InactiveAccount => "inactive_account",
            AppError::PermissionDenied => "permission_denied",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::EditConflict => "edit_conflict",
            AppError::FailedValidation(_) => "failed_validation",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound => "not_found",
            AppError::RateLimited => "rate_limited",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidToken
            | AppError::AuthenticationRequired
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::InactiveAccount | AppError::PermissionDenied => StatusCode::FORBIDDEN,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::FailedValidation(fields) => json!({ "error": fields }),
            AppError::Internal(detail) => {
                error!(error = %detail, "request failed");
                json!({ "error": SERVER_ERROR_MESSAGE })
            }
            other => json!({ "error": other.to_string() }),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, AppError::InvalidToken) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken | AuthError::TokenNotFound => AppError::InvalidToken,
            AuthError::AuthenticationRequired => AppError::AuthenticationRequired,
            AuthError::InactiveAccount => AppError::InactiveAccount,
            AuthError::PermissionDenied => AppError::PermissionDenied,
            AuthError::CredentialMismatch => AppError::InvalidCredentials,
            AuthError::EditConflict => AppError::EditConflict,
            AuthError::Hashing(_) | AuthError::Internal(_) | AuthError::Store(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}
