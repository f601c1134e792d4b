//! Multi-stage species matching
//!
//! Stages run in a fixed order:
//! 1. Trait elimination: containment query on the extracted traits, capped at
//!    10 candidates, each at a flat confidence of 0.85.
//! 2. No candidates: nearest-neighbour search over all embeddings
//!    (similarity > 0.5, at most 5), method `vector_match`.
//! 3. One candidate: accepted as is, method `trait_elimination`.
//! 4. Several candidates: each is rescored with the cosine similarity between
//!    its stored embedding and the query embedding and the list re-sorted.
//!    Candidates without a usable embedding are dropped.
//!
//! An empty ranking is terminal; callers report it as no match.

use calyx_common::db::{IdentificationMethod, ScoredSpecies, SpeciesSummary, TraitSet};
use calyx_common::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::similarity::cosine_similarity;
use crate::store::CandidateStore;

/// Maximum trait-elimination candidates
pub const TRAIT_MATCH_LIMIT: i64 = 10;

/// Flat confidence of a trait-elimination candidate
pub const TRAIT_MATCH_CONFIDENCE: f64 = 0.85;

/// Minimum similarity for the vector fallback
pub const VECTOR_MATCH_THRESHOLD: f64 = 0.5;

/// Maximum vector fallback candidates
pub const VECTOR_MATCH_LIMIT: usize = 5;

/// Number of runner-up candidates reported as alternatives
pub const ALTERNATIVES: usize = 3;

/// Ranked candidates, best first
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub method: IdentificationMethod,
    pub candidates: Vec<ScoredSpecies>,
}

impl Ranking {
    pub fn top(&self) -> Option<&ScoredSpecies> {
        self.candidates.first()
    }

    /// Candidates ranked 2nd to 4th
    pub fn alternatives(&self) -> &[ScoredSpecies] {
        let end = self.candidates.len().min(1 + ALTERNATIVES);
        self.candidates.get(1..end).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Orchestrates trait elimination, refinement and vector fallback
pub struct MatchingEngine {
    store: Arc<dyn CandidateStore>,
}

impl MatchingEngine {
    pub fn new(store: Arc<dyn CandidateStore>) -> Self {
        Self { store }
    }

    /// Rank species for one query
    ///
    /// Store failures in the trait and vector stages are returned; a failure
    /// while fetching embeddings for refinement keeps the trait ranking.
    pub async fn rank(&self, traits: &TraitSet, embedding: &[f32]) -> Result<Ranking> {
        let candidates = self.eliminate_by_traits(traits).await?;

        let ranking = match candidates.len() {
            0 => {
                let mut candidates = self
                    .store
                    .nearest_by_embedding(embedding, VECTOR_MATCH_THRESHOLD, VECTOR_MATCH_LIMIT)
                    .await?;
                sort_by_confidence(&mut candidates);
                candidates.truncate(VECTOR_MATCH_LIMIT);

                Ranking {
                    method: IdentificationMethod::VectorMatch,
                    candidates,
                }
            }
            1 => Ranking {
                method: IdentificationMethod::TraitElimination,
                candidates,
            },
            _ => Ranking {
                method: IdentificationMethod::TraitElimination,
                candidates: self.refine(candidates, embedding).await,
            },
        };

        debug!(
            method = %ranking.method,
            candidates = ranking.candidates.len(),
            top = ranking.top().map(|c| c.species.scientific_name.as_str()).unwrap_or("-"),
            "Ranking complete"
        );
        Ok(ranking)
    }

    async fn eliminate_by_traits(&self, traits: &TraitSet) -> Result<Vec<ScoredSpecies>> {
        let mut species = self.store.find_by_traits(traits, TRAIT_MATCH_LIMIT).await?;
        species.truncate(TRAIT_MATCH_LIMIT as usize);

        debug!(matched = species.len(), "Trait elimination");
        Ok(species
            .into_iter()
            .map(|s| ScoredSpecies::new(s, TRAIT_MATCH_CONFIDENCE))
            .collect())
    }

    async fn refine(&self, candidates: Vec<ScoredSpecies>, embedding: &[f32]) -> Vec<ScoredSpecies> {
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.species.id).collect();

        match self.store.embeddings_for(&ids).await {
            Ok(rows) => score_candidates(rows, embedding),
            Err(e) => {
                warn!(error = %e, "Embedding fetch failed, keeping trait ranking");
                candidates
            }
        }
    }
}

/// Rescore by cosine similarity to `query`, best first
///
/// Rows with no stored embedding, a zero-norm embedding or a mismatched
/// dimension are dropped.
pub fn score_candidates(
    rows: Vec<(SpeciesSummary, Option<Vec<f32>>)>,
    query: &[f32],
) -> Vec<ScoredSpecies> {
    let mut scored: Vec<ScoredSpecies> = rows
        .into_iter()
        .filter_map(|(species, stored)| {
            let similarity = cosine_similarity(query, stored.as_deref()?)?;
            Some(ScoredSpecies::new(species, similarity))
        })
        .collect();

    sort_by_confidence(&mut scored);
    scored
}

fn sort_by_confidence(candidates: &mut [ScoredSpecies]) {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}
