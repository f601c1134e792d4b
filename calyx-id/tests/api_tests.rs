//! Integration tests for calyx-id HTTP endpoints

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use calyx_common::db::FlowerSize;
use calyx_id::extractors::Extractor;
use calyx_id::store::{SpeciesStore, SqliteStore};
use calyx_id::AppState;
use common::{create_test_db, embedding_from, extractor_with, new_species, png_bytes, traits, MockVision};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "calyx-test-boundary";

/// Router over a seeded database; TempDir must outlive the test
async fn create_test_app(extractor: Arc<Extractor>) -> (tempfile::TempDir, Router, Vec<Uuid>) {
    let (dir, pool) = create_test_db().await;
    let store = SqliteStore::new(pool.clone());

    let mut ids = Vec::new();
    for (name, color, vector) in [
        ("Rosa canina", "pink", [1.0_f32, 0.0]),
        ("Rosa gallica", "pink", [0.8, 0.6]),
        ("Papaver rhoeas", "red", [0.0, 1.0]),
    ] {
        let mut species = new_species(name, traits(&[color], 5, FlowerSize::Medium));
        species.growing_info.native_region = vec!["FR".to_string()];
        species.embedding = Some(embedding_from(&vector));
        ids.push(store.insert_species(&species).await.unwrap());
    }

    let state = AppState::new(pool, extractor, 7);
    (dir, calyx_id::build_router(state), ids)
}

fn default_extractor() -> Arc<Extractor> {
    extractor_with(Arc::new(MockVision::new(
        traits(&["pink"], 5, FlowerSize::Medium),
        embedding_from(&[1.0, 0.1]),
    )))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn multipart(uri: &str, field: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"flower.png\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app, _) = create_test_app(default_extractor()).await;

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "calyx-id");
    assert_eq!(json["vision_backend"], true);
}

#[tokio::test]
async fn test_health_degraded_without_backend() {
    let (_dir, app, _) = create_test_app(Arc::new(Extractor::histogram_only())).await;

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_service_info() {
    let (_dir, app, _) = create_test_app(default_extractor()).await;

    let (status, json) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "operational");
    assert_eq!(json["flowers_count"], 3);
}

#[tokio::test]
async fn test_identify_then_cache_hit() {
    let (_dir, app, ids) = create_test_app(default_extractor()).await;
    let image = png_bytes(240, 150, 200);

    let (status, first) = send(&app, multipart("/api/v1/identify", "image", "image/png", &image)).await;
    assert_eq!(status, StatusCode::OK, "body: {}", first);
    assert_eq!(first["method"], "trait_elimination");
    assert_eq!(first["species_id"], ids[0].to_string());
    assert_eq!(first["alternatives"].as_array().unwrap().len(), 1);
    assert_eq!(first["hit_count"], 0);

    let (status, second) = send(&app, multipart("/api/v1/identify", "image", "image/png", &image)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["method"], "cache_hit");
    assert_eq!(second["hit_count"], 1);
    assert_eq!(second["identification_id"], first["identification_id"]);

    let (_, uncached) = send(
        &app,
        multipart("/api/v1/identify?use_cache=false", "image", "image/png", &image),
    )
    .await;
    assert_eq!(uncached["method"], "trait_elimination");
    assert_ne!(uncached["identification_id"], first["identification_id"]);
}

#[tokio::test]
async fn test_identify_rejects_bad_uploads() {
    let (_dir, app, _) = create_test_app(default_extractor()).await;

    let (status, json) = send(&app, multipart("/api/v1/identify", "photo", "image/png", &png_bytes(1, 2, 3))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(&app, multipart("/api/v1/identify", "image", "text/plain", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, multipart("/api/v1/identify", "image", "image/png", b"not a png")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_identify_no_match() {
    let extractor = extractor_with(Arc::new(MockVision::new(
        traits(&["green"], 9, FlowerSize::Small),
        embedding_from(&[0.0, 0.0, 1.0]),
    )));
    let (_dir, app, _) = create_test_app(extractor).await;

    let (status, json) = send(&app, multipart("/api/v1/identify", "image", "image/png", &png_bytes(0, 200, 0))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NO_MATCH");
}

#[tokio::test]
async fn test_identify_backend_failure() {
    let extractor = extractor_with(Arc::new(MockVision::failing(traits(&["pink"], 5, FlowerSize::Medium))));
    let (_dir, app, _) = create_test_app(extractor).await;

    let (status, json) = send(&app, multipart("/api/v1/identify", "image", "image/png", &png_bytes(9, 9, 9))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "EXTRACTION_FAILED");
}

#[tokio::test]
async fn test_search_endpoint() {
    let (_dir, app, _) = create_test_app(default_extractor()).await;

    let (status, json) = send(&app, get("/api/v1/search?q=rosa")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 2);

    let (status, json) = send(&app, get("/api/v1/search?q=rosa&limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get("/api/v1/search?q=r")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_species_detail_endpoint() {
    let (_dir, app, ids) = create_test_app(default_extractor()).await;

    let (status, json) = send(&app, get(&format!("/api/v1/species/{}", ids[2]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scientific_name"], "Papaver rhoeas");

    let (status, _) = send(&app, get(&format!("/api/v1/species/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, get("/api/v1/species/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    // Viewing a species counts towards popularity
    let (_, popular) = send(&app, get("/api/v1/popular?limit=1")).await;
    assert_eq!(popular[0]["scientific_name"], "Papaver rhoeas");
}

#[tokio::test]
async fn test_catalogue_endpoints() {
    let (_dir, app, _) = create_test_app(default_extractor()).await;

    let (status, json) = send(&app, get("/api/v1/catalogue?color=pink&sort_by=name&limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["pages"], 2);
    assert_eq!(json["total_pages"], 2);
    assert_eq!(json["items"][0]["scientific_name"], "Rosa canina");

    let (status, json) = send(&app, get("/api/v1/catalogue?country=FR&limit=500")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["limit"], 100);
    assert_eq!(json["items"].as_array().unwrap().len(), 3);

    let (status, _) = send(&app, get("/api/v1/catalogue?sort_by=random")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, get("/api/v1/catalogue/filters")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["colors"][0], json!({"value": "pink", "label": "Pink", "count": 2}));
    assert_eq!(json["countries"][0]["value"], "FR");
    assert_eq!(json["sort_options"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_feedback_and_stats_endpoints() {
    let (_dir, app, _) = create_test_app(default_extractor()).await;
    let image = png_bytes(240, 150, 200);

    let (_, identified) = send(&app, multipart("/api/v1/identify", "image", "image/png", &image)).await;
    send(&app, multipart("/api/v1/identify", "image", "image/png", &image)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/feedback")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "identification_id": identified["identification_id"],
                "is_correct": true,
                "notes": "spot on"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"status": "success", "message": "Feedback recorded"}));

    let (status, stats) = send(&app, get("/api/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_identifications"], 1);
    assert_eq!(stats["total_cache_hits"], 1);
    assert!(stats.get("cache_hits").is_none());
    assert_eq!(stats["cache_hit_rate"], 1.0);
}
