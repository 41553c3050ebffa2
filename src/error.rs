//! Error taxonomy shared by services and handlers.
//!
//! State-machine and validation failures map to stable 4xx codes; storage and
//! infrastructure faults collapse into a generic 5xx whose detail only goes to
//! the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("User not found")]
    UserNotFound,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    // Same text for unknown email and wrong password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Refresh token not found")]
    RefreshTokenNotFound,

    #[error("Refresh token has expired")]
    RefreshTokenExpired,

    #[error("Email is already verified")]
    AlreadyVerified,

    #[error("Code does not match")]
    CodeMismatch,

    #[error("Code has expired")]
    CodeExpired,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Access denied")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Machine-stable reason sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::TokenInvalid => "TOKEN_INVALID",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::RefreshTokenNotFound => "REFRESH_TOKEN_NOT_FOUND",
            AppError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            AppError::AlreadyVerified => "ALREADY_VERIFIED",
            AppError::CodeMismatch => "CODE_MISMATCH",
            AppError::CodeExpired => "CODE_EXPIRED",
            AppError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::EmailAlreadyRegistered | AppError::AlreadyVerified => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::TokenInvalid
            | AppError::TokenExpired
            | AppError::RefreshTokenNotFound
            | AppError::RefreshTokenExpired
            | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::CodeMismatch | AppError::CodeExpired | AppError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
            "Internal server error".to_string()
        } else {
            tracing::debug!(error = %self, code, "request rejected");
            self.to_string()
        };

        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}
