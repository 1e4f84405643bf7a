use crate::api::handlers;
use crate::api::ApiState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn create_router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/chat/completions", post(handlers::chat_completions))
}
