//! Feedback and stats endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::StatsSnapshot;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// `identification_id` returned by identify
    pub identification_id: String,
    pub is_correct: bool,
    pub correct_species_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub status: String,
    pub message: String,
}

/// POST /api/v1/feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    if request.identification_id.trim().is_empty() {
        return Err(ApiError::BadRequest("identification_id is required".to_string()));
    }

    state
        .feedback
        .save_feedback(
            request.identification_id.trim(),
            request.is_correct,
            request.correct_species_id,
            request.notes,
        )
        .await;

    Ok(Json(FeedbackResponse {
        status: "success".to_string(),
        message: "Feedback recorded".to_string(),
    }))
}

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.feedback.stats().await)
}

/// Build feedback routes
pub fn feedback_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/feedback", post(submit_feedback))
        .route("/api/v1/stats", get(get_stats))
}
