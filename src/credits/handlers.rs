use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::dto::{CreditBalance, UpdateCreditsRequest};
use crate::{
    auth::middleware::{AnyRole, Authorized, Staff},
    error::AppError,
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/credits/balance", get(own_balance))
        .route("/credits/student/:id", get(student_balance))
}

pub fn write_routes() -> Router<AppState> {
    Router::new().route("/credits/update", post(update_credits))
}

#[instrument(skip(state, caller), fields(user_id = caller.0.user_id))]
pub async fn own_balance(
    State(state): State<AppState>,
    caller: Authorized<AnyRole>,
) -> Result<Json<CreditBalance>, AppError> {
    let row = state.credits.get_balance(caller.0.user_id).await?;
    Ok(Json(row.into()))
}

#[instrument(skip(state, _caller))]
pub async fn student_balance(
    State(state): State<AppState>,
    _caller: Authorized<Staff>,
    Path(id): Path<i64>,
) -> Result<Json<CreditBalance>, AppError> {
    let row = state.credits.get_balance(id).await?;
    Ok(Json(row.into()))
}

#[instrument(skip(state, caller, payload), fields(by = caller.0.user_id))]
pub async fn update_credits(
    State(state): State<AppState>,
    caller: Authorized<Staff>,
    Json(payload): Json<UpdateCreditsRequest>,
) -> Result<&'static str, AppError> {
    payload.validate()?;
    state
        .credits
        .update_balance(payload.student_id, payload.amount)
        .await?;
    Ok("Credits updated successfully")
}
