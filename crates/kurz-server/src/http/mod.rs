//! HTTP surface: a thin axum adapter over the request core.

mod auth;
mod error;
mod handlers;
mod model;

pub use auth::AuthUser;
pub use error::ApiError;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

use crate::service::ShortenerService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ShortenerService>,
    /// Name of the auth cookie carrying the signed user identifier.
    pub cookie_name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::shorten_text))
        .route("/{token}", get(handlers::redirect))
        .route("/ping", get(handlers::ping))
        .route("/api/shorten", post(handlers::shorten_json))
        .route("/api/shorten/batch", post(handlers::shorten_batch))
        .route(
            "/api/user/urls",
            get(handlers::user_urls).delete(handlers::delete_user_urls),
        )
        .route("/api/internal/stats", get(handlers::internal_stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .with_state(state)
}
