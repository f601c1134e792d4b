//! Identification, catalogue and feedback services

pub mod catalogue;
pub mod embedding_backfill;
pub mod feedback;
pub mod identification_cache;
pub mod identifier;
pub mod matching_engine;
pub mod species;
pub mod species_import;

pub use catalogue::{CatalogueQuery, CatalogueService, FilterOptions, Page};
pub use embedding_backfill::{BackfillReport, EmbeddingBackfill, HttpImageFetcher, ImageFetcher};
pub use feedback::{FeedbackService, StatsSnapshot};
pub use identification_cache::{IdentificationCache, NewCacheEntry};
pub use identifier::{IdentificationResult, IdentificationService};
pub use matching_engine::{MatchingEngine, Ranking};
pub use species::SpeciesService;
pub use species_import::{import_species_file, ImportReport};

use thiserror::Error;

use crate::extractors::ExtractionError;

/// Outcomes of the upward-facing operations other than success
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unreadable image or malformed request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Vision backend unreachable or errored
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Pipeline finished with zero candidates
    #[error("No matching flowers found")]
    NoMatch,

    #[error("Not found: {0}")]
    NotFound(String),

    /// Load-bearing store read failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] calyx_common::Error),
}
