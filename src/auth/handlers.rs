use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            clean_email, AuthResponse, LoginRequest, LogoutRequest, MeResponse, RefreshRequest,
            RegisterRequest,
        },
        middleware::{AnyRole, Authorized},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh-token", post(refresh))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let registration = payload.validate()?;
    let session = state.auth.register(registration).await?;
    Ok(Json(session.into()))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    // A malformed address cannot belong to anyone.
    let email = clean_email(&payload.email).map_err(|_| AppError::InvalidCredentials)?;
    let session = state.auth.authenticate(&email, &payload.password).await?;
    Ok(Json(session.into()))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let session = state.auth.refresh_token(&payload.refresh_token).await?;
    Ok(Json(session.into()))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<LogoutRequest>,
) -> Result<StatusCode, AppError> {
    state.auth.logout(&payload.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, caller), fields(user_id = caller.0.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    caller: Authorized<AnyRole>,
) -> Result<Json<MeResponse>, AppError> {
    let user = state.auth.profile(caller.0.user_id).await?;
    Ok(Json(user.into()))
}
