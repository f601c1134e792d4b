//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Dimension of species and query embeddings
pub const EMBEDDING_DIM: usize = 384;

/// How an identification result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
    TraitElimination,
    VectorMatch,
    CacheHit,
}

impl IdentificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TraitElimination => "trait_elimination",
            Self::VectorMatch => "vector_match",
            Self::CacheHit => "cache_hit",
        }
    }
}

impl fmt::Display for IdentificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentificationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trait_elimination" => Ok(Self::TraitElimination),
            "vector_match" => Ok(Self::VectorMatch),
            "cache_hit" => Ok(Self::CacheHit),
            other => Err(Error::InvalidInput(format!("Unknown identification method: {}", other))),
        }
    }
}

/// Flower size class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowerSize {
    Small,
    Medium,
    Large,
}

impl FlowerSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl FromStr for FlowerSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(Error::InvalidInput(format!("Unknown flower size: {}", other))),
        }
    }
}

/// Petal count: either an exact number or a category such as "many"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PetalCount {
    Exact(i64),
    Category(String),
}

impl PetalCount {
    /// Zero and blank categories carry no information and impose no constraint
    pub fn is_specified(&self) -> bool {
        match self {
            Self::Exact(n) => *n != 0,
            Self::Category(s) => !s.trim().is_empty(),
        }
    }
}

/// Discrete visual traits of a flower
///
/// Persisted as JSON with keys `color_primary` (list of strings; a bare string
/// is accepted on input), `petal_count` (integer or category) and `flower_size`.
/// Unknown keys are preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraitSet {
    #[serde(default, deserialize_with = "one_or_many")]
    pub color_primary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub petal_count: Option<PetalCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flower_size: Option<FlowerSize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TraitSet {
    /// Colors that constrain a trait search (blank entries dropped)
    pub fn wanted_colors(&self) -> Vec<&str> {
        self.color_primary
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Petal count if it constrains a trait search
    pub fn wanted_petal_count(&self) -> Option<&PetalCount> {
        self.petal_count.as_ref().filter(|p| p.is_specified())
    }

    /// True if no field would constrain a trait search
    pub fn is_unconstrained(&self) -> bool {
        self.wanted_colors().is_empty()
            && self.wanted_petal_count().is_none()
            && self.flower_size.is_none()
    }

    /// True if any of this set's colors is in `wanted`
    pub fn has_any_color<S: AsRef<str>>(&self, wanted: &[S]) -> bool {
        self.color_primary
            .iter()
            .any(|c| wanted.iter().any(|w| w.as_ref() == c))
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

/// Species listing row used by search, catalogue and ranking results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSummary {
    pub id: Uuid,
    pub scientific_name: String,
    pub common_names: Vec<String>,
    pub family: Option<String>,
    pub primary_image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub traits: TraitSet,
    pub native_region: Vec<String>,
    pub bloom_season: Vec<String>,
    pub search_count: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Species with a confidence score from the matching engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSpecies {
    #[serde(flatten)]
    pub species: SpeciesSummary,
    pub confidence: f64,
}

impl ScoredSpecies {
    pub fn new(species: SpeciesSummary, confidence: f64) -> Self {
        Self { species, confidence }
    }
}

/// Cultivation details nested in the species detail view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowingInfo {
    #[serde(default)]
    pub native_region: Vec<String>,
    #[serde(default)]
    pub climate_zones: Vec<String>,
    pub hardiness_zones: Option<String>,
    pub light_requirement: Option<String>,
    pub water_needs: Option<String>,
    pub soil_preference: Option<String>,
    pub ph_range: Option<String>,
    #[serde(default)]
    pub growing_season: Vec<String>,
    pub mature_height: Option<String>,
    pub mature_spread: Option<String>,
    pub growth_rate: Option<String>,
}

/// Full species record for the detail view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesDetail {
    pub id: Uuid,
    pub scientific_name: String,
    pub common_names: Vec<String>,
    pub family: Option<String>,
    pub description: Option<String>,
    pub care_tips: Option<String>,
    pub bloom_season: Vec<String>,
    pub traits: TraitSet,
    pub primary_image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub growing_info: GrowingInfo,
    pub search_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Species record as supplied by the import file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSpecies {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub scientific_name: String,
    #[serde(default)]
    pub common_names: Vec<String>,
    pub family: Option<String>,
    pub description: Option<String>,
    pub care_tips: Option<String>,
    #[serde(default)]
    pub bloom_season: Vec<String>,
    #[serde(default)]
    pub traits: TraitSet,
    pub primary_image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    #[serde(flatten)]
    pub growing_info: GrowingInfo,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub search_count: i64,
    /// Defaults to the insert time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Species still waiting for an embedding
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub id: Uuid,
    pub scientific_name: String,
    pub primary_image_url: Option<String>,
}

/// Identification cache row
///
/// Valid as a response only while `now < expires_at`. Only `hit_count` is
/// ever updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationCacheEntry {
    pub id: Uuid,
    pub image_hash: String,
    pub species_id: Uuid,
    pub confidence: f64,
    pub traits_extracted: TraitSet,
    pub method: IdentificationMethod,
    pub hit_count: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl IdentificationCacheEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Cache row joined with the species it points at
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIdentification {
    pub entry: IdentificationCacheEntry,
    pub species: SpeciesSummary,
}

/// User correction of an identification (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    /// Identification cache row id; not checked for existence
    pub cache_id: String,
    pub user_confirmed: bool,
    pub correct_species_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
