//! Color-histogram fallback classifier
//!
//! Coarse best-effort traits from the mean color of a downscaled image. Used
//! when the vision backend is unconfigured, failing or out of quota. It cannot
//! fail and marks its output with `confidence.fallback = true`.

use calyx_common::db::{FlowerSize, PetalCount, TraitSet};
use image::imageops::{self, FilterType};
use serde_json::json;

use super::FlowerImage;

/// Side length of the downscaled image the means are taken over
const SAMPLE_SIZE: u32 = 100;

/// Blue channel level above which a green-dominant image reads as blue
const BLUE_CAST_LEVEL: f64 = 150.0;

/// Confidence reported for the fallback color guess
const FALLBACK_COLOR_CONFIDENCE: f64 = 0.3;

/// Mean-color classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramClassifier;

impl HistogramClassifier {
    pub fn classify(&self, image: &FlowerImage) -> TraitSet {
        let (r, g, b) = mean_rgb(image);
        let color = dominant_color(r, g, b);

        TraitSet {
            color_primary: vec![color.to_string()],
            petal_count: Some(PetalCount::Exact(5)),
            flower_size: Some(FlowerSize::Medium),
            extra: [(
                "confidence".to_string(),
                json!({"fallback": true, "color": FALLBACK_COLOR_CONFIDENCE}),
            )]
            .into_iter()
            .collect(),
        }
    }
}

fn mean_rgb(image: &FlowerImage) -> (f64, f64, f64) {
    let sample = imageops::resize(image.rgb(), SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle);

    let mut sums = [0.0f64; 3];
    for pixel in sample.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0.iter()) {
            *sum += *channel as f64;
        }
    }

    let count = (sample.width() as f64 * sample.height() as f64).max(1.0);
    (sums[0] / count, sums[1] / count, sums[2] / count)
}

/// Map channel means to a color label
fn dominant_color(r: f64, g: f64, b: f64) -> &'static str {
    if r > g && r > b {
        "red"
    } else if g > r && g > b {
        if b > BLUE_CAST_LEVEL {
            "blue"
        } else {
            "yellow"
        }
    } else if b > r && b > g {
        "blue"
    } else {
        "white"
    }
}
