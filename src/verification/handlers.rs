use axum::{extract::State, routing::post, Json, Router};
use tracing::instrument;

use super::dto::{
    EmailRequest, MessageResponse, ResetPasswordRequest, VerifiedResponse, VerifyEmailRequest,
};
use crate::{auth::dto::clean_email, error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/resend-otp", post(resend_otp))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<VerifiedResponse>, AppError> {
    let (email, code) = payload.validate()?;
    state.verification.verify_email(&email, &code).await?;
    Ok(Json(VerifiedResponse {
        message: "Email verified successfully".into(),
        verified: true,
    }))
}

#[instrument(skip(state, payload))]
pub async fn resend_otp(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = clean_email(&payload.email)?;
    state.verification.resend_verification_code(&email).await?;
    Ok(Json(MessageResponse::new("Verification code sent")))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = clean_email(&payload.email)?;
    state.password_reset.request_password_reset(&email).await?;
    Ok(Json(MessageResponse::new("Password reset code sent")))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let (email, code) = payload.validate()?;
    state
        .password_reset
        .reset_password(&email, &code, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}
