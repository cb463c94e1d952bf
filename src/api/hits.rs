//! Hit and host API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        hit::IncrementHit,
        host::CreateHost,
        CreateHit, Hit, HitQuery, HitsSummary, Host,
    },
};

#[derive(Serialize, ToSchema)]
pub struct DeleteHitsResponse {
    /// Number of hits removed
    pub deleted: u64,
}

/// List hits in count order
#[utoipa::path(
    get,
    path = "/hits",
    tag = "hits",
    params(HitQuery),
    responses(
        (status = 200, description = "Hits, highest count first", body = Vec<Hit>),
        (status = 400, description = "Invalid query parameter")
    )
)]
pub async fn list_hits(
    State(state): State<crate::AppState>,
    Query(query): Query<HitQuery>,
) -> AppResult<Json<Vec<Hit>>> {
    let hits = state.services.hits.list(&query).await?;
    Ok(Json(hits))
}

/// Summary statistics for the selected hits
#[utoipa::path(
    get,
    path = "/hits/summary",
    tag = "hits",
    params(HitQuery),
    responses(
        (status = 200, description = "Hit totals", body = HitsSummary),
        (status = 400, description = "Invalid query parameter")
    )
)]
pub async fn hits_summary(
    State(state): State<crate::AppState>,
    Query(query): Query<HitQuery>,
) -> AppResult<Json<HitsSummary>> {
    let summary = state.services.hits.summary(&query).await?;
    Ok(Json(summary))
}

/// Record a hit
#[utoipa::path(
    post,
    path = "/hits",
    tag = "hits",
    request_body = CreateHit,
    responses(
        (status = 201, description = "Hit recorded", body = Hit),
        (status = 409, description = "Hit rejected by the store's unique index"),
        (status = 422, description = "Hit is invalid")
    )
)]
pub async fn create_hit(
    State(state): State<crate::AppState>,
    Json(data): Json<CreateHit>,
) -> AppResult<(StatusCode, Json<Hit>)> {
    let hit = state.services.hits.create(&data).await?;
    Ok((StatusCode::CREATED, Json(hit)))
}

/// Add requests to an existing hit
#[utoipa::path(
    post,
    path = "/hits/{id}/increment",
    tag = "hits",
    params(("id" = i64, Path, description = "Hit ID")),
    request_body = IncrementHit,
    responses(
        (status = 200, description = "Updated hit", body = Hit),
        (status = 404, description = "Hit not found")
    )
)]
pub async fn increment_hit(
    State(state): State<crate::AppState>,
    Path(id): Path<i64>,
    Json(data): Json<IncrementHit>,
) -> AppResult<Json<Hit>> {
    let hit = state.services.hits.increment(id, data.by).await?;
    Ok(Json(hit))
}

/// Delete every hit
#[utoipa::path(
    delete,
    path = "/hits",
    tag = "hits",
    responses(
        (status = 200, description = "Hits deleted", body = DeleteHitsResponse)
    )
)]
pub async fn delete_hits(
    State(state): State<crate::AppState>,
) -> AppResult<Json<DeleteHitsResponse>> {
    let deleted = state.services.hits.delete_all().await?;
    Ok(Json(DeleteHitsResponse { deleted }))
}

/// Find or create a host by name
#[utoipa::path(
    post,
    path = "/hosts",
    tag = "hosts",
    request_body = CreateHost,
    responses(
        (status = 201, description = "Host", body = Host)
    )
)]
pub async fn create_host(
    State(state): State<crate::AppState>,
    Json(data): Json<CreateHost>,
) -> AppResult<(StatusCode, Json<Host>)> {
    let host = state.services.hits.find_or_create_host(&data.hostname).await?;
    Ok((StatusCode::CREATED, Json(host)))
}
