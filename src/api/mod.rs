//! HTTP shim
//!
//! An OpenAI-shaped chat completion endpoint over the shared [`ChatService`],
//! built on axum.
//!
//! # Endpoints
//!
//! - `GET /health` - model id and readiness
//! - `POST /v1/chat/completions` - buffered chat completion

pub mod handlers;
pub mod routes;
pub mod types;

use crate::inference::engine::EngineError;
use crate::service::ChatService;
use crate::types::config::ServerConfig;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ChatService>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotLoaded => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = serde_json::json!({
            "error": self.to_string()
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Router with CORS and request tracing applied
pub fn app(service: Arc<ChatService>) -> axum::Router {
    create_router()
        .with_state(ApiState { service })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Load the model, then serve the API until the listener fails.
pub async fn serve(service: Arc<ChatService>, server: ServerConfig) -> anyhow::Result<()> {
    service.ensure_loaded().await?;

    let addr = server.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app(service)).await?;
    Ok(())
}
