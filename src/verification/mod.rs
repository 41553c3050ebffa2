use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod otp;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
