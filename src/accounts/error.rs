use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failures of the account lifecycle operations.
///
/// `InvalidOrExpiredToken` deliberately covers wrong, expired, and
/// already-consumed tokens alike, so callers cannot probe token existence.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Username or email already registered")]
    DuplicateIdentity,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("Failed to register user")]
    RegistrationFailed(#[source] anyhow::Error),
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = match &self {
            AccountError::DuplicateIdentity => StatusCode::CONFLICT,
            AccountError::UserNotFound => StatusCode::NOT_FOUND,
            AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AccountError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            AccountError::RegistrationFailed(source) => {
                error!(error = %source, "registration failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AccountError::Internal(source) => {
                error!(error = %source, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
