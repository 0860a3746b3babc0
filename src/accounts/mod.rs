use crate::state::AppState;
use axum::Router;

mod dto;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod memory;
pub mod notify;
pub mod password;
pub mod pg;
pub mod session;
pub mod store;
pub mod token;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
