//! Identification workflow
//!
//! hash → cache lookup → decode → extract → rank → cache write-back.

use calyx_common::db::{IdentificationMethod, ScoredSpecies, TraitSet};
use calyx_common::hash::content_hash;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::identification_cache::{IdentificationCache, NewCacheEntry};
use super::matching_engine::MatchingEngine;
use super::ServiceError;
use crate::extractors::{Extractor, FlowerImage};
use crate::store::SpeciesStore;

/// Accepted identification with runner-up alternatives
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationResult {
    /// Cache row id, referenced by feedback
    pub identification_id: Uuid,
    pub species_id: Uuid,
    pub scientific_name: String,
    pub common_names: Vec<String>,
    pub confidence: f64,
    pub primary_image_url: Option<String>,
    pub method: IdentificationMethod,
    pub traits_extracted: TraitSet,
    /// Candidates ranked 2nd to 4th; empty for cache hits
    pub alternatives: Vec<ScoredSpecies>,
    /// Times this result has been served from cache, this request included
    pub hit_count: i64,
    pub response_time_ms: u64,
}

pub struct IdentificationService {
    extractor: Arc<Extractor>,
    engine: MatchingEngine,
    cache: IdentificationCache,
    species: Arc<dyn SpeciesStore>,
}

impl IdentificationService {
    pub fn new(
        extractor: Arc<Extractor>,
        engine: MatchingEngine,
        cache: IdentificationCache,
        species: Arc<dyn SpeciesStore>,
    ) -> Self {
        Self {
            extractor,
            engine,
            cache,
            species,
        }
    }

    /// Identify the species in `image_bytes`
    ///
    /// With `use_cache`, a valid cache entry for the same bytes is returned as
    /// `cache_hit` and its hit count incremented. Otherwise the full pipeline
    /// runs and the top candidate is written back to the cache.
    pub async fn identify(
        &self,
        image_bytes: &[u8],
        use_cache: bool,
    ) -> Result<IdentificationResult, ServiceError> {
        let started = Instant::now();

        if image_bytes.is_empty() {
            return Err(ServiceError::InvalidInput("Empty image upload".to_string()));
        }

        let image_hash = content_hash(image_bytes);

        if use_cache {
            if let Some(hit) = self.cache.lookup(&image_hash).await {
                self.cache.record_hit(hit.entry.id).await;

                info!(
                    species = %hit.species.scientific_name,
                    cache_id = %hit.entry.id,
                    "Identification served from cache"
                );
                return Ok(IdentificationResult {
                    identification_id: hit.entry.id,
                    species_id: hit.species.id,
                    scientific_name: hit.species.scientific_name,
                    common_names: hit.species.common_names,
                    confidence: hit.entry.confidence,
                    primary_image_url: hit.species.primary_image_url,
                    method: IdentificationMethod::CacheHit,
                    traits_extracted: hit.entry.traits_extracted,
                    alternatives: Vec::new(),
                    hit_count: hit.entry.hit_count + 1,
                    response_time_ms: elapsed_ms(started),
                });
            }
        }

        let image = FlowerImage::decode(image_bytes)
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        let extraction = self.extractor.extract(&image).await?;

        let ranking = self
            .engine
            .rank(&extraction.traits, &extraction.embedding)
            .await
            .map_err(ServiceError::StoreUnavailable)?;

        let top = ranking.top().ok_or(ServiceError::NoMatch)?;
        let identification_id = Uuid::new_v4();

        self.cache
            .write(NewCacheEntry {
                id: identification_id,
                image_hash,
                species_id: top.species.id,
                confidence: top.confidence,
                traits: extraction.traits.clone(),
                method: ranking.method,
            })
            .await;

        if let Err(e) = self.species.increment_search_count(top.species.id).await {
            warn!(species_id = %top.species.id, error = %e, "Failed to bump search count");
        }

        info!(
            species = %top.species.scientific_name,
            confidence = top.confidence,
            method = %ranking.method,
            source = ?extraction.source,
            "Identification complete"
        );

        Ok(IdentificationResult {
            identification_id,
            species_id: top.species.id,
            scientific_name: top.species.scientific_name.clone(),
            common_names: top.species.common_names.clone(),
            confidence: top.confidence,
            primary_image_url: top.species.primary_image_url.clone(),
            method: ranking.method,
            traits_extracted: extraction.traits,
            alternatives: ranking.alternatives().to_vec(),
            hit_count: 0,
            response_time_ms: elapsed_ms(started),
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
