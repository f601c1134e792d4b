//! calyx-id library interface
//!
//! Flower identification service: trait extraction from photos, candidate
//! ranking against the species database, result caching, catalogue browsing
//! and feedback collection. Exposed as a library for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod pagination;
pub mod services;
pub mod similarity;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use axum::http::{HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::extractors::Extractor;
use crate::services::{
    CatalogueService, FeedbackService, IdentificationCache, IdentificationService, MatchingEngine,
    SpeciesService,
};
use crate::store::SqliteStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub extractor: Arc<Extractor>,
    pub identification: Arc<IdentificationService>,
    pub species: Arc<SpeciesService>,
    pub catalogue: Arc<CatalogueService>,
    pub feedback: Arc<FeedbackService>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every service to one SQLite-backed store
    pub fn new(db: SqlitePool, extractor: Arc<Extractor>, cache_ttl_days: i64) -> Self {
        let store = Arc::new(SqliteStore::new(db.clone()));

        let identification = IdentificationService::new(
            Arc::clone(&extractor),
            MatchingEngine::new(store.clone()),
            IdentificationCache::new(store.clone(), cache_ttl_days),
            store.clone(),
        );

        Self {
            db,
            extractor,
            identification: Arc::new(identification),
            species: Arc::new(SpeciesService::new(store.clone())),
            catalogue: Arc::new(CatalogueService::new(store.clone())),
            feedback: Arc::new(FeedbackService::new(store.clone(), store)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::identify_routes())
        .merge(api::species_routes())
        .merge(api::catalogue_routes())
        .merge(api::feedback_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS policy for the browser front-end
///
/// Origins that fail to parse as header values are skipped with a warning.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}
