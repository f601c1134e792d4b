//! Persistent store interfaces
//!
//! The services depend on these narrow traits rather than on SQLite directly,
//! so each can be exercised against an in-memory double. [`SqliteStore`]
//! implements all of them.

pub mod sqlite;

pub use sqlite::{decode_embedding, encode_embedding, SqliteStore};

use async_trait::async_trait;
use calyx_common::db::{
    CachedIdentification, FeedbackEntry, IdentificationCacheEntry, NewSpecies, PendingEmbedding,
    ScoredSpecies, SpeciesDetail, SpeciesSummary, TraitSet,
};
use calyx_common::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Candidate retrieval used by the matching engine
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// Species whose traits contain every constrained field of `traits`
    async fn find_by_traits(&self, traits: &TraitSet, limit: i64) -> Result<Vec<SpeciesSummary>>;

    /// Species with similarity strictly above `threshold`, best first
    async fn nearest_by_embedding(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredSpecies>>;

    /// Stored embeddings (possibly NULL) for exactly the given species
    async fn embeddings_for(&self, ids: &[Uuid]) -> Result<Vec<(SpeciesSummary, Option<Vec<f32>>)>>;
}

/// Species reads and writes outside the matching pipeline
#[async_trait]
pub trait SpeciesStore: Send + Sync {
    async fn text_search(&self, query: &str, limit: i64) -> Result<Vec<SpeciesSummary>>;

    async fn species_detail(&self, id: Uuid) -> Result<Option<SpeciesDetail>>;

    /// Most searched species first
    async fn popular(&self, limit: i64) -> Result<Vec<SpeciesSummary>>;

    async fn species_count(&self) -> Result<i64>;

    /// Atomic `search_count + 1`
    async fn increment_search_count(&self, id: Uuid) -> Result<()>;

    async fn insert_species(&self, species: &NewSpecies) -> Result<Uuid>;

    async fn species_missing_embedding(&self) -> Result<Vec<PendingEmbedding>>;

    async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<()>;
}

/// Catalogue sort key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Scientific name ascending
    #[default]
    Name,
    /// search_count descending
    Popularity,
    /// created_at descending
    Recent,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Popularity => "popularity",
            Self::Recent => "recent",
        }
    }

    pub fn all() -> [SortBy; 3] {
        [Self::Name, Self::Popularity, Self::Recent]
    }
}

impl FromStr for SortBy {
    type Err = calyx_common::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "popularity" => Ok(Self::Popularity),
            "recent" => Ok(Self::Recent),
            other => Err(calyx_common::Error::InvalidInput(format!("Unknown sort key: {}", other))),
        }
    }
}

/// Filters evaluated inside the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogueFilter {
    /// Case-insensitive substring of the scientific name, or exact common name
    pub name: Option<String>,
    /// Region code contained in `native_region`
    pub region: Option<String>,
    /// Single color contained in `traits.color_primary`
    pub color: Option<String>,
}

/// Catalogue listing and filter enumeration
#[async_trait]
pub trait CatalogueStore: Send + Sync {
    /// One page of matching species plus the total match count
    async fn catalogue_page(
        &self,
        filter: &CatalogueFilter,
        sort: SortBy,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<SpeciesSummary>, i64)>;

    /// Traits and native regions of every species
    async fn trait_and_region_values(&self) -> Result<Vec<(TraitSet, Vec<String>)>>;

    async fn count_by_color(&self, color: &str) -> Result<i64>;

    async fn count_by_region(&self, region: &str) -> Result<i64>;
}

/// Identification cache rows
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Newest row for `image_hash` with `expires_at > now`
    async fn find_valid(&self, image_hash: &str, now: DateTime<Utc>) -> Result<Option<CachedIdentification>>;

    async fn insert_entry(&self, entry: &IdentificationCacheEntry) -> Result<()>;

    /// Atomic `hit_count + 1`
    async fn increment_hit_count(&self, id: Uuid) -> Result<()>;

    /// Row count and sum of hit counts over all rows
    async fn usage_totals(&self) -> Result<(i64, i64)>;
}

/// Append-only feedback log
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn insert_feedback(&self, entry: &FeedbackEntry) -> Result<()>;
}
