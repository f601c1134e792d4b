//! Shared test helpers for calyx-id integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use calyx_common::db::{FlowerSize, NewSpecies, PetalCount, TraitSet, EMBEDDING_DIM};
use calyx_id::extractors::{DailyQuota, ExtractionError, Extractor, FlowerImage, VisionBackend};
use image::{ImageFormat, Rgb, RgbImage};
use sqlx::SqlitePool;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Temporary database with the full schema
///
/// TempDir must be kept alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = calyx_id::db::init_database_pool(&temp_dir.path().join("calyx.db"))
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

/// Embedding whose leading components are `values`, zero-padded to full size
pub fn embedding_from(values: &[f32]) -> Vec<f32> {
    let mut embedding = vec![0.0; EMBEDDING_DIM];
    embedding[..values.len()].copy_from_slice(values);
    embedding
}

pub fn traits(colors: &[&str], petals: i64, size: FlowerSize) -> TraitSet {
    TraitSet {
        color_primary: colors.iter().map(|c| c.to_string()).collect(),
        petal_count: Some(PetalCount::Exact(petals)),
        flower_size: Some(size),
        ..Default::default()
    }
}

pub fn new_species(name: &str, traits: TraitSet) -> NewSpecies {
    NewSpecies {
        scientific_name: name.to_string(),
        traits,
        ..Default::default()
    }
}

/// Solid-color PNG
pub fn png_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(16, 16, Rgb([r, g, b]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes
}

/// Vision backend with canned answers and call counting
pub struct MockVision {
    pub traits: TraitSet,
    pub embedding: Result<Vec<f32>, String>,
    pub trait_calls: AtomicUsize,
    pub embedding_calls: AtomicUsize,
}

impl MockVision {
    pub fn new(traits: TraitSet, embedding: Vec<f32>) -> Self {
        Self {
            traits,
            embedding: Ok(embedding),
            trait_calls: AtomicUsize::new(0),
            embedding_calls: AtomicUsize::new(0),
        }
    }

    /// Backend whose embedding call always fails
    pub fn failing(traits: TraitSet) -> Self {
        Self {
            embedding: Err("model loading".to_string()),
            ..Self::new(traits, Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.trait_calls.load(Ordering::SeqCst) + self.embedding_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionBackend for MockVision {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn extract_traits(&self, _image: &FlowerImage) -> Result<TraitSet, ExtractionError> {
        self.trait_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.traits.clone())
    }

    async fn embedding(&self, _image: &FlowerImage) -> Result<Vec<f32>, ExtractionError> {
        self.embedding_calls.fetch_add(1, Ordering::SeqCst);
        self.embedding
            .clone()
            .map_err(|message| ExtractionError::Api(503, message))
    }
}

/// Extractor backed by `backend` with a generous quota
pub fn extractor_with(backend: Arc<MockVision>) -> Arc<Extractor> {
    Arc::new(Extractor::new(
        Some(backend as Arc<dyn VisionBackend>),
        DailyQuota::new(1000),
    ))
}
