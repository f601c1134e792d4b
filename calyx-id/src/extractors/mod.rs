//! Image feature extraction
//!
//! [`Extractor`] is the single capability the identification pipeline talks
//! to. It owns a primary [`VisionBackend`] (a hosted zero-shot model), the
//! [`HistogramClassifier`] fallback and the [`DailyQuota`] that decides which
//! of the two produces traits for a given request.

pub mod clip_client;
pub mod histogram;

pub use clip_client::ClipClient;
pub use histogram::HistogramClassifier;

use async_trait::async_trait;
use calyx_common::db::{TraitSet, EMBEDDING_DIM};
use chrono::{DateTime, NaiveDate, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Bytes are not a decodable image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// No backend configured for an operation that requires one
    #[error("Extractor unavailable: {0}")]
    Unavailable(String),
}

/// Decoded upload, normalized to 8-bit RGB
#[derive(Debug, Clone)]
pub struct FlowerImage {
    rgb: RgbImage,
}

impl FlowerImage {
    /// Decode any format the `image` crate recognizes
    pub fn decode(bytes: &[u8]) -> Result<Self, ExtractionError> {
        if bytes.is_empty() {
            return Err(ExtractionError::InvalidImage("empty upload".to_string()));
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ExtractionError::InvalidImage(e.to_string()))?;
        Self::from_rgb(decoded.to_rgb8())
    }

    pub fn from_rgb(rgb: RgbImage) -> Result<Self, ExtractionError> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(ExtractionError::InvalidImage("image has no pixels".to_string()));
        }
        Ok(Self { rgb })
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.rgb.dimensions()
    }

    /// Re-encode as JPEG for upload to a remote model
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, ExtractionError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode_image(&self.rgb)
            .map_err(|e| ExtractionError::InvalidImage(format!("JPEG encode failed: {}", e)))?;
        Ok(buffer)
    }
}

/// Remote model able to classify traits and embed images
#[async_trait]
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract_traits(&self, image: &FlowerImage) -> Result<TraitSet, ExtractionError>;

    async fn embedding(&self, image: &FlowerImage) -> Result<Vec<f32>, ExtractionError>;
}

/// Which variant produced a trait set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitSource {
    Primary,
    Histogram,
}

/// Traits plus query embedding for one image
#[derive(Debug, Clone)]
pub struct Extraction {
    pub traits: TraitSet,
    pub embedding: Vec<f32>,
    pub source: TraitSource,
}

#[derive(Debug)]
struct QuotaUsage {
    day: NaiveDate,
    used: u32,
}

/// Calls to the primary backend allowed per UTC day
///
/// The counter lives in this value, not in process-global state, and resets
/// the first time it is consulted on a new UTC day.
#[derive(Debug)]
pub struct DailyQuota {
    max_per_day: u32,
    usage: Mutex<QuotaUsage>,
}

impl DailyQuota {
    pub fn new(max_per_day: u32) -> Self {
        Self {
            max_per_day,
            usage: Mutex::new(QuotaUsage {
                day: Utc::now().date_naive(),
                used: 0,
            }),
        }
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    /// Reserve one call, false when today's allowance is spent
    pub async fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now()).await
    }

    pub async fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut usage = self.usage.lock().await;

        let today = now.date_naive();
        if usage.day != today {
            usage.day = today;
            usage.used = 0;
        }

        if usage.used >= self.max_per_day {
            return false;
        }
        usage.used += 1;
        true
    }

    pub async fn used_today(&self) -> u32 {
        let usage = self.usage.lock().await;
        if usage.day == Utc::now().date_naive() {
            usage.used
        } else {
            0
        }
    }
}

/// Trait and embedding extraction with quota-driven fallback
pub struct Extractor {
    backend: Option<Arc<dyn VisionBackend>>,
    fallback: HistogramClassifier,
    quota: DailyQuota,
}

impl Extractor {
    pub fn new(backend: Option<Arc<dyn VisionBackend>>, quota: DailyQuota) -> Self {
        Self {
            backend,
            fallback: HistogramClassifier,
            quota,
        }
    }

    /// Extractor with no remote backend: traits from the histogram only,
    /// embeddings unavailable
    pub fn histogram_only() -> Self {
        Self::new(None, DailyQuota::new(0))
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn quota(&self) -> &DailyQuota {
        &self.quota
    }

    /// Traits then embedding; only the embedding can fail
    pub async fn extract(&self, image: &FlowerImage) -> Result<Extraction, ExtractionError> {
        let (traits, source) = self.extract_traits(image).await;
        let embedding = self.embedding(image).await?;

        Ok(Extraction {
            traits,
            embedding,
            source,
        })
    }

    /// Primary traits while quota remains, histogram otherwise
    ///
    /// Never fails: any primary error degrades to the histogram result.
    pub async fn extract_traits(&self, image: &FlowerImage) -> (TraitSet, TraitSource) {
        if let Some(backend) = &self.backend {
            if self.quota.try_acquire().await {
                match backend.extract_traits(image).await {
                    Ok(traits) => return (traits, TraitSource::Primary),
                    Err(e) => warn!(backend = backend.name(), error = %e, "Trait extraction failed, using histogram fallback"),
                }
            } else {
                debug!(limit = self.quota.max_per_day(), "Daily vision quota spent, using histogram fallback");
            }
        }

        (self.fallback.classify(image), TraitSource::Histogram)
    }

    /// Query embedding from the primary backend, checked to be 384-dimensional
    pub async fn embedding(&self, image: &FlowerImage) -> Result<Vec<f32>, ExtractionError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| ExtractionError::Unavailable("no vision backend configured".to_string()))?;

        let embedding = backend.embedding(image).await?;
        if embedding.len() != EMBEDDING_DIM {
            return Err(ExtractionError::Parse(format!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                EMBEDDING_DIM
            )));
        }
        Ok(embedding)
    }
}
