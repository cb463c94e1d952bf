//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{health, hits};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hitstats API",
        version = "1.0.0",
        description = "HTTP hit aggregation and reporting API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Hits
        hits::list_hits,
        hits::hits_summary,
        hits::create_hit,
        hits::increment_hit,
        hits::delete_hits,
        // Hosts
        hits::create_host,
    ),
    components(
        schemas(
            health::HealthResponse,
            hits::DeleteHitsResponse,
            crate::models::Hit,
            crate::models::HitCategory,
            crate::models::HitsSummary,
            crate::models::CreateHit,
            crate::models::Host,
            crate::models::host::CreateHost,
            crate::models::hit::IncrementHit,
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "hits", description = "Hit recording and reporting"),
        (name = "hosts", description = "Hosts hits are recorded against"),
    )
)]
pub struct ApiDoc;

/// Create router for OpenAPI documentation
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
