//! Hosted CLIP client
//!
//! Zero-shot trait classification and image embeddings from a Hugging Face
//! style inference endpoint. Images are re-encoded as JPEG and sent base64
//! encoded in a JSON body.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use calyx_common::db::{FlowerSize, PetalCount, TraitSet, EMBEDDING_DIM};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{ExtractionError, FlowerImage, VisionBackend};

pub const DEFAULT_API_URL: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_MODEL: &str = "openai/clip-vit-base-patch32";
const USER_AGENT: &str = concat!("calyx-id/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const JPEG_QUALITY: u8 = 85;

/// Petal count reported for the "many petals" label
const MANY_PETALS: i64 = 10;

const COLOR_LABELS: [&str; 7] = [
    "yellow flower",
    "white flower",
    "red flower",
    "pink flower",
    "purple flower",
    "blue flower",
    "orange flower",
];

const PETAL_LABELS: [&str; 5] = [
    "flower with 3 petals",
    "flower with 4 petals",
    "flower with 5 petals",
    "flower with 6 petals",
    "flower with many petals",
];

const SIZE_LABELS: [&str; 3] = ["small flower", "medium flower", "large flower"];

/// One zero-shot classification score
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Client for a hosted CLIP model
pub struct ClipClient {
    http_client: reqwest::Client,
    api_url: String,
    model: String,
    token: String,
}

impl ClipClient {
    pub fn new(token: String) -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            token,
        })
    }

    /// Point at a different inference host (self-hosted or test server)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.api_url, self.model)
    }

    async fn post(&self, body: &Value) -> Result<Value, ExtractionError> {
        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ExtractionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api(status.as_u16(), message));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ExtractionError::Parse(e.to_string()))
    }

    /// Best label among `labels` for the image
    async fn classify(&self, encoded: &str, labels: &[&str]) -> Result<LabelScore, ExtractionError> {
        let body = json!({
            "inputs": encoded,
            "parameters": { "candidate_labels": labels },
        });

        let value = self.post(&body).await?;
        let scores: Vec<LabelScore> =
            serde_json::from_value(value).map_err(|e| ExtractionError::Parse(e.to_string()))?;

        top_label(scores).ok_or_else(|| ExtractionError::Parse("empty classification result".to_string()))
    }

    fn encode(image: &FlowerImage) -> Result<String, ExtractionError> {
        Ok(STANDARD.encode(image.to_jpeg(JPEG_QUALITY)?))
    }
}

#[async_trait]
impl VisionBackend for ClipClient {
    fn name(&self) -> &'static str {
        "clip"
    }

    async fn extract_traits(&self, image: &FlowerImage) -> Result<TraitSet, ExtractionError> {
        let encoded = Self::encode(image)?;

        let color = self.classify(&encoded, &COLOR_LABELS).await?;
        let petals = self.classify(&encoded, &PETAL_LABELS).await?;
        let size = self.classify(&encoded, &SIZE_LABELS).await?;

        debug!(
            color = %color.label,
            petals = %petals.label,
            size = %size.label,
            "Zero-shot classification complete"
        );

        let mut extra = BTreeMap::new();
        extra.insert(
            "confidence".to_string(),
            json!({"color": color.score, "petals": petals.score, "size": size.score}),
        );

        Ok(TraitSet {
            color_primary: vec![parse_color_label(&color.label)],
            petal_count: Some(parse_petal_label(&petals.label)),
            flower_size: Some(parse_size_label(&size.label)),
            extra,
        })
    }

    async fn embedding(&self, image: &FlowerImage) -> Result<Vec<f32>, ExtractionError> {
        let body = json!({
            "inputs": Self::encode(image)?,
            "options": { "wait_for_model": true },
        });

        parse_embedding(&self.post(&body).await?)
    }
}

/// Highest-scoring label
pub fn top_label(scores: Vec<LabelScore>) -> Option<LabelScore> {
    scores.into_iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

/// "yellow flower" -> "yellow"
pub fn parse_color_label(label: &str) -> String {
    label
        .split_whitespace()
        .next()
        .unwrap_or("unknown")
        .to_ascii_lowercase()
}

/// "flower with 5 petals" -> 5, "flower with many petals" -> 10
pub fn parse_petal_label(label: &str) -> PetalCount {
    let words: Vec<&str> = label.split_whitespace().collect();
    if words.contains(&"many") {
        return PetalCount::Exact(MANY_PETALS);
    }

    words
        .iter()
        .find_map(|w| w.parse::<i64>().ok())
        .map(PetalCount::Exact)
        .unwrap_or(PetalCount::Exact(5))
}

/// "small flower" -> Small; unknown labels read as medium
pub fn parse_size_label(label: &str) -> FlowerSize {
    label
        .split_whitespace()
        .next()
        .and_then(|w| w.parse().ok())
        .unwrap_or(FlowerSize::Medium)
}

/// Accept a flat vector or a batch of one; keep the first 384 components
pub fn parse_embedding(value: &Value) -> Result<Vec<f32>, ExtractionError> {
    let values = match value {
        Value::Array(items) if items.first().map(Value::is_array).unwrap_or(false) => {
            items[0].as_array().cloned().unwrap_or_default()
        }
        Value::Array(items) => items.clone(),
        other => {
            return Err(ExtractionError::Parse(format!(
                "expected an embedding array, got {}",
                other
            )))
        }
    };

    if values.len() < EMBEDDING_DIM {
        return Err(ExtractionError::Parse(format!(
            "embedding has {} dimensions, need at least {}",
            values.len(),
            EMBEDDING_DIM
        )));
    }

    values
        .iter()
        .take(EMBEDDING_DIM)
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ExtractionError::Parse(format!("non-numeric component: {}", v)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_label_picks_highest_score() {
        let scores = vec![
            LabelScore { label: "white flower".to_string(), score: 0.1 },
            LabelScore { label: "pink flower".to_string(), score: 0.7 },
            LabelScore { label: "red flower".to_string(), score: 0.2 },
        ];
        assert_eq!(top_label(scores).unwrap().label, "pink flower");
        assert!(top_label(Vec::new()).is_none());
    }

    #[test]
    fn test_parse_color_label() {
        assert_eq!(parse_color_label("Yellow flower"), "yellow");
        assert_eq!(parse_color_label(""), "unknown");
    }

    #[test]
    fn test_parse_petal_label() {
        assert_eq!(parse_petal_label("flower with 4 petals"), PetalCount::Exact(4));
        assert_eq!(parse_petal_label("flower with many petals"), PetalCount::Exact(10));
        assert_eq!(parse_petal_label("flower"), PetalCount::Exact(5));
    }

    #[test]
    fn test_parse_size_label() {
        assert_eq!(parse_size_label("large flower"), FlowerSize::Large);
        assert_eq!(parse_size_label("huge flower"), FlowerSize::Medium);
    }

    #[test]
    fn test_parse_embedding_truncates() {
        let value = json!(vec![0.25; 512]);
        let embedding = parse_embedding(&value).unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        assert_eq!(embedding[0], 0.25);
    }

    #[test]
    fn test_parse_embedding_accepts_batch() {
        let value = json!([vec![1.0; 400]]);
        assert_eq!(parse_embedding(&value).unwrap().len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_parse_embedding_rejects_short_vector() {
        let value = json!(vec![1.0; 100]);
        assert!(matches!(parse_embedding(&value), Err(ExtractionError::Parse(_))));
    }

    #[test]
    fn test_parse_embedding_rejects_non_array() {
        assert!(parse_embedding(&json!({"error": "loading"})).is_err());
    }

    #[test]
    fn test_with_api_url_trims_slash() {
        let client = ClipClient::new("token".to_string())
            .unwrap()
            .with_api_url("http://localhost:9000/models/");
        assert_eq!(client.endpoint(), format!("http://localhost:9000/models/{}", DEFAULT_MODEL));
    }
}
