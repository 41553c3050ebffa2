use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Router,
};
use tracing::instrument;

use crate::{
    auth::middleware::{AdminOnly, Authorized},
    error::AppError,
    state::AppState,
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users/:id", delete(delete_user))
        .route("/users/:id/restore", post(restore_user))
}

#[instrument(skip(state, caller), fields(by = caller.0.user_id))]
pub async fn delete_user(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.accounts.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, caller), fields(by = caller.0.user_id))]
pub async fn restore_user(
    State(state): State<AppState>,
    caller: Authorized<AdminOnly>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.accounts.restore(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
