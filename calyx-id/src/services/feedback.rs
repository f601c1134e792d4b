//! User feedback and usage statistics

use calyx_common::db::FeedbackEntry;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{CacheStore, FeedbackStore};

/// Usage counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Identification cache rows ever written
    pub total_identifications: i64,
    /// Sum of hit counts over all cache rows
    #[serde(rename = "total_cache_hits")]
    pub cache_hits: i64,
    /// cache_hits / max(total_identifications, 1)
    pub cache_hit_rate: f64,
}

impl StatsSnapshot {
    pub fn from_totals(total_identifications: i64, cache_hits: i64) -> Self {
        Self {
            total_identifications,
            cache_hits,
            cache_hit_rate: cache_hits as f64 / total_identifications.max(1) as f64,
        }
    }
}

pub struct FeedbackService {
    feedback: Arc<dyn FeedbackStore>,
    cache: Arc<dyn CacheStore>,
}

impl FeedbackService {
    pub fn new(feedback: Arc<dyn FeedbackStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self { feedback, cache }
    }

    /// Append a correction
    ///
    /// `cache_id` is not checked against the cache. Store failures are logged
    /// and never surface to the caller.
    pub async fn save_feedback(
        &self,
        cache_id: &str,
        is_correct: bool,
        correct_species_id: Option<String>,
        notes: Option<String>,
    ) {
        let entry = FeedbackEntry {
            id: Uuid::new_v4(),
            cache_id: cache_id.to_string(),
            user_confirmed: is_correct,
            correct_species_id,
            notes,
            created_at: Utc::now(),
        };

        match self.feedback.insert_feedback(&entry).await {
            Ok(()) => info!(cache_id, is_correct, "Feedback recorded"),
            Err(e) => warn!(cache_id, error = %e, "Failed to save feedback"),
        }
    }

    /// Usage counters; zeros if the store is unavailable
    pub async fn stats(&self) -> StatsSnapshot {
        match self.cache.usage_totals().await {
            Ok((total, hits)) => StatsSnapshot::from_totals(total, hits),
            Err(e) => {
                warn!(error = %e, "Stats query failed");
                StatsSnapshot::from_totals(0, 0)
            }
        }
    }
}
