//! Route table

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::AppState;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/generate", post(handlers::generate))
        .route("/v1/upscale", post(handlers::upscale))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
