//! Identification endpoint

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::services::IdentificationResult;
use crate::AppState;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Multipart field names accepted for the image
const IMAGE_FIELDS: [&str; 2] = ["image", "file"];

#[derive(Debug, Deserialize)]
pub struct IdentifyParams {
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

/// POST /api/v1/identify?use_cache=bool
///
/// Multipart body with the photo in field `image`.
pub async fn identify(
    State(state): State<AppState>,
    Query(params): Query<IdentifyParams>,
    mut multipart: Multipart,
) -> ApiResult<Json<IdentificationResult>> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if !field.name().map(|n| IMAGE_FIELDS.contains(&n)).unwrap_or(false) {
            continue;
        }

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
                return Err(ApiError::BadRequest("File must be an image".to_string()));
            }
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
        upload = Some(bytes);
        break;
    }

    let image = upload.ok_or_else(|| ApiError::BadRequest("Missing 'image' upload field".to_string()))?;
    debug!(bytes = image.len(), use_cache = params.use_cache, "Identify request");

    let result = state.identification.identify(&image, params.use_cache).await?;
    Ok(Json(result))
}

/// Build identification routes
pub fn identify_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/identify", post(identify))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
