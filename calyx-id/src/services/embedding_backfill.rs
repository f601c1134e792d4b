//! Embedding backfill
//!
//! Offline batch job: computes embeddings for species stored without one.
//! Each species is fetched and embedded independently; a failure is logged
//! and the species left untouched for the next run. No placeholder vectors
//! are ever written.

use async_trait::async_trait;
use calyx_common::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::extractors::{ExtractionError, Extractor, FlowerImage};
use crate::store::SpeciesStore;

/// Default pause between species
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(3000);

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of reference images
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, ExtractionError>;
}

/// Fetches images over HTTP(S)
pub struct HttpImageFetcher {
    http_client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> std::result::Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("calyx-id/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, ExtractionError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Api(status.as_u16(), format!("GET {}", url)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Outcome of one backfill run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Species without an embedding at the start of the run
    pub processed: usize,
    pub updated: usize,
    /// No image URL to embed
    pub skipped: usize,
    pub failed: usize,
    /// Species still without an embedding
    pub remaining: usize,
}

pub struct EmbeddingBackfill {
    store: Arc<dyn SpeciesStore>,
    extractor: Arc<Extractor>,
    fetcher: Arc<dyn ImageFetcher>,
    pause: Duration,
}

impl EmbeddingBackfill {
    pub fn new(store: Arc<dyn SpeciesStore>, extractor: Arc<Extractor>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            store,
            extractor,
            fetcher,
            pause: DEFAULT_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Embed every species that lacks an embedding
    ///
    /// Only the initial listing can fail the run.
    pub async fn run(&self) -> Result<BackfillReport> {
        let pending = self.store.species_missing_embedding().await?;
        let mut report = BackfillReport {
            processed: pending.len(),
            ..Default::default()
        };

        info!(count = pending.len(), "Starting embedding backfill");

        for (index, species) in pending.iter().enumerate() {
            let Some(url) = species.primary_image_url.as_deref().filter(|u| !u.trim().is_empty()) else {
                warn!(species = %species.scientific_name, "No image URL, skipping");
                report.skipped += 1;
                continue;
            };

            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            match self.embed(url).await {
                Ok(embedding) => match self.store.set_embedding(species.id, &embedding).await {
                    Ok(()) => {
                        info!(species = %species.scientific_name, "Embedding stored");
                        report.updated += 1;
                    }
                    Err(e) => {
                        warn!(species = %species.scientific_name, error = %e, "Failed to store embedding");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(species = %species.scientific_name, error = %e, "Failed to compute embedding");
                    report.failed += 1;
                }
            }
        }

        report.remaining = report.processed - report.updated;
        info!(
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            remaining = report.remaining,
            "Embedding backfill finished"
        );
        Ok(report)
    }

    async fn embed(&self, url: &str) -> std::result::Result<Vec<f32>, ExtractionError> {
        let bytes = self.fetcher.fetch(url).await?;
        let image = FlowerImage::decode(&bytes)?;
        self.extractor.embedding(&image).await
    }
}
