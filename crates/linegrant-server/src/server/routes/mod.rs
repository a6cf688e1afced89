//! HTTP surface of the claim service.
//!
//! - [`handler`] - request handlers.
//! - [`payload`] - lenient body decoding and response shapes.

pub mod handler;
pub mod payload;

use crate::server::state::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/claim", post(handler::claim))
        .route("/append", post(handler::append))
        .route("/lines", get(handler::list_lines))
        .route("/aux", get(handler::aux))
        .route("/health", get(handler::health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
