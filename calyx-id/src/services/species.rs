//! Species lookups: text search, detail, popularity

use calyx_common::db::{SpeciesDetail, SpeciesSummary};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::ServiceError;
use crate::store::SpeciesStore;

/// Shortest accepted text query
pub const MIN_QUERY_LEN: usize = 2;

pub const DEFAULT_SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 100;

pub const DEFAULT_POPULAR_LIMIT: i64 = 10;
pub const MAX_POPULAR_LIMIT: i64 = 50;

pub struct SpeciesService {
    store: Arc<dyn SpeciesStore>,
}

impl SpeciesService {
    pub fn new(store: Arc<dyn SpeciesStore>) -> Self {
        Self { store }
    }

    /// Scientific-name substring or exact common-name match
    ///
    /// Queries shorter than two characters are rejected; store errors yield
    /// an empty list.
    pub async fn search_by_text(&self, query: &str, limit: i64) -> Result<Vec<SpeciesSummary>, ServiceError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return Err(ServiceError::InvalidInput(format!(
                "Search query must be at least {} characters",
                MIN_QUERY_LEN
            )));
        }

        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        match self.store.text_search(query, limit).await {
            Ok(results) => Ok(results),
            Err(e) => {
                warn!(query, error = %e, "Text search failed");
                Ok(Vec::new())
            }
        }
    }

    /// Full record; each successful view counts towards popularity
    pub async fn species_detail(&self, id: Uuid) -> Result<SpeciesDetail, ServiceError> {
        let detail = self
            .store
            .species_detail(id)
            .await
            .map_err(ServiceError::StoreUnavailable)?
            .ok_or_else(|| ServiceError::NotFound("Species not found".to_string()))?;

        if let Err(e) = self.store.increment_search_count(id).await {
            warn!(species_id = %id, error = %e, "Failed to bump search count");
        }

        Ok(detail)
    }

    /// Most searched species, limit clamped to 1..=50
    pub async fn popular(&self, limit: i64) -> Vec<SpeciesSummary> {
        let limit = limit.clamp(1, MAX_POPULAR_LIMIT);
        self.store.popular(limit).await.unwrap_or_else(|e| {
            warn!(error = %e, "Popular species query failed");
            Vec::new()
        })
    }

    /// Catalogue size, 0 when unknown
    pub async fn species_count(&self) -> i64 {
        self.store.species_count().await.unwrap_or_else(|e| {
            warn!(error = %e, "Species count failed");
            0
        })
    }
}
