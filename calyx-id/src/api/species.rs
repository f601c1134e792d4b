//! Species search, detail and popularity endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use calyx_common::db::{SpeciesDetail, SpeciesSummary};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::species::{DEFAULT_POPULAR_LIMIT, DEFAULT_SEARCH_LIMIT};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PopularParams {
    pub limit: Option<i64>,
}

/// GET /api/v1/search?q=&limit=
pub async fn search_species(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SpeciesSummary>>> {
    let results = state
        .species
        .search_by_text(&params.q, params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await?;
    Ok(Json(results))
}

/// GET /api/v1/species/:id
pub async fn get_species(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SpeciesDetail>> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::NotFound("Species not found".to_string()))?;
    Ok(Json(state.species.species_detail(id).await?))
}

/// GET /api/v1/popular?limit=
pub async fn popular_species(
    State(state): State<AppState>,
    Query(params): Query<PopularParams>,
) -> Json<Vec<SpeciesSummary>> {
    Json(
        state
            .species
            .popular(params.limit.unwrap_or(DEFAULT_POPULAR_LIMIT))
            .await,
    )
}

/// Build species routes
pub fn species_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/search", get(search_species))
        .route("/api/v1/species/:id", get(get_species))
        .route("/api/v1/popular", get(popular_species))
}
