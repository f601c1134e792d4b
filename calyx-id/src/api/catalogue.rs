//! Catalogue endpoints

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use calyx_common::db::SpeciesSummary;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::services::{CatalogueQuery, FilterOptions, Page};
use crate::store::SortBy;
use crate::AppState;

/// Query string of GET /api/v1/catalogue
#[derive(Debug, Default, Deserialize)]
pub struct CatalogueParams {
    pub name: Option<String>,
    /// Comma-separated colors
    pub color: Option<String>,
    /// Region code
    pub country: Option<String>,
    pub sort_by: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl CatalogueParams {
    pub fn into_query(self) -> Result<CatalogueQuery, ApiError> {
        let sort = match self.sort_by.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<SortBy>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            None => SortBy::default(),
        };

        Ok(CatalogueQuery {
            name: self.name.filter(|n| !n.trim().is_empty()),
            colors: self
                .color
                .as_deref()
                .map(CatalogueQuery::parse_colors)
                .unwrap_or_default(),
            region: self.country.filter(|c| !c.trim().is_empty()),
            sort,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }
}

/// GET /api/v1/catalogue
pub async fn get_catalogue(
    State(state): State<AppState>,
    Query(params): Query<CatalogueParams>,
) -> ApiResult<Json<Page<SpeciesSummary>>> {
    let query = params.into_query()?;
    Ok(Json(state.catalogue.query(&query).await))
}

/// GET /api/v1/catalogue/filters
pub async fn get_filters(State(state): State<AppState>) -> Json<FilterOptions> {
    Json(state.catalogue.available_filters().await)
}

/// Build catalogue routes
pub fn catalogue_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/catalogue", get(get_catalogue))
        .route("/api/v1/catalogue/filters", get(get_filters))
}
