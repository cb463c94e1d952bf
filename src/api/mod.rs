//! API handlers for Hitstats REST endpoints

pub mod health;
pub mod hits;
pub mod openapi;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Hosts
        .route("/hosts", post(hits::create_host))
        // Hits
        .route(
            "/hits",
            get(hits::list_hits)
                .post(hits::create_hit)
                .delete(hits::delete_hits),
        )
        .route("/hits/summary", get(hits::hits_summary))
        .route("/hits/:id/increment", post(hits::increment_hit))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi::create_openapi_router())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}
