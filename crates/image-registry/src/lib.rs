//! Golden Image Registry Service
//!
//! Records golden machine image builds per environment and answers
//! "latest valid image" queries for deployment tooling.

pub mod config;
pub mod handlers;
pub mod models;
pub mod storage;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use handlers::AppState;
pub use storage::Storage;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/images", post(handlers::ingest_handler))
        .route("/api/images/{image_id}", get(handlers::get_image_handler))
        .route(
            "/api/images/{image_id}/state",
            put(handlers::transition_handler),
        )
        .route(
            "/api/images/{image_id}/deregister",
            post(handlers::deregister_handler),
        )
        .route(
            "/api/images/{image_id}/validation",
            get(handlers::image_validation_handler),
        )
        .route("/api/validate", post(handlers::validate_handler))
        .route("/api/environments", get(handlers::list_environments_handler))
        .route(
            "/api/environments/{environment}/latest",
            get(handlers::latest_handler),
        )
        .route(
            "/api/environments/{environment}/images",
            get(handlers::history_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
