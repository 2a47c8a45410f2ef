//! HTTP surface served over a real socket with in-memory backends.

mod fixtures;
mod helpers;

use std::time::Duration;

use fixtures::{corrupt_png, png_bytes};
use helpers::Harness;
use image_jobs::routes;
use image_jobs::services::cache::Cacher;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};

async fn serve(harness: &Harness) -> String {
    let app = routes::router(harness.state.clone(), None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn image_part(name: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes).file_name(name.to_string()).mime_str("image/png").unwrap()
}

#[tokio::test]
async fn submit_job_queues_and_returns_accepted() {
    let harness = Harness::new();
    let base = serve(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/v1/jobs"))
        .json(&json!({
            "image_url": "https://images.example.com/a.png",
            "request": {"resize": {"width": 100, "height": 100}, "compress": true}
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["job_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(harness.broker.pending(), 1);
}

#[tokio::test]
async fn submit_job_rejects_invalid_request() {
    let harness = Harness::new();
    let base = serve(&harness).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/jobs"))
        .json(&json!({
            "image_url": "https://images.example.com/a.png",
            "request": {"resize": {"width": 0, "height": 100}}
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(harness.broker.pending(), 0);
}

#[tokio::test]
async fn resize_with_invalid_quality_uses_default() {
    let harness = Harness::new();
    let base = serve(&harness).await;

    let form = Form::new()
        .part("image", image_part("photo.png", png_bytes(200, 100)))
        .text("width", "64")
        .text("height", "32")
        .text("quality", "very high")
        .text("format", "jpeg");
    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/images/resize"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let size = &body["data"]["size"];
    assert_eq!(size["width"], 64);
    assert_eq!(size["height"], 32);
    assert_eq!(size["quality"], 85);
    assert_eq!(size["format"], "jpeg");
}

#[tokio::test]
async fn process_applies_payload_and_rejects_non_images() {
    let harness = Harness::new();
    let base = serve(&harness).await;
    let client = reqwest::Client::new();

    let payload = json!({
        "crop": {"x": 0, "y": 0, "width": 5000, "height": 5000},
        "watermark": {"text": "demo", "position": "nowhere", "opacity": 2.0}
    });
    let form = Form::new()
        .part("image", image_part("wide.png", png_bytes(300, 150)))
        .text("payload", payload.to_string());
    let response = client
        .post(format!("{base}/api/v1/images/process"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["size"]["width"], 300);
    assert_eq!(body["data"]["size"]["height"], 150);
    assert_eq!(body["data"]["size"]["format"], "png");

    let form = Form::new().part(
        "image",
        Part::bytes(b"%PDF-1.4 not an image".to_vec()).file_name("doc.pdf"),
    );
    let response = client
        .post(format!("{base}/api/v1/images/process"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn batch_reports_per_slot_results() {
    let harness = Harness::new();
    let base = serve(&harness).await;

    let form = Form::new()
        .part("images", image_part("ok.png", png_bytes(40, 40)))
        .part("images", image_part("bad.png", corrupt_png()))
        .text("payload", json!({"resize": {"width": 8, "height": 8}}).to_string());
    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/images/batch"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let data = &body["data"];
    assert_eq!(data["status"], "partial");
    assert_eq!(data["succeeded"], 1);
    assert_eq!(data["failed"], 1);
    assert!(data["slots"][1]["error"].as_str().unwrap().starts_with("decode error"));
}

#[tokio::test]
async fn health_and_stats_reflect_backends() {
    let harness = Harness::new();
    let base = serve(&harness).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/api/v1/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["broker"]["status"], "ok");

    harness.cache.set_failing(true);
    let response = client.get(format!("{base}/api/v1/health/cache")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let response = client.get(format!("{base}/api/v1/health/storage")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = client.get(format!("{base}/api/v1/health/database")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.submit("https://images.example.com/a.png", Default::default()).await;
    let body: Value = client
        .get(format!("{base}/api/v1/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["pending"], 1);
    assert_eq!(body["data"]["dead_letters"], 0);
    // Queue counts are still served while the cache is down.
    assert!(body["data"]["cache_entries"].is_null());
}

#[tokio::test]
async fn stats_count_cached_results() {
    let harness = Harness::new();
    let base = serve(&harness).await;
    let ttl = Duration::from_secs(60);
    harness.cache.set("img_cache:one", b"{}", ttl).await.unwrap();
    harness.cache.set("img_cache:two", b"{}", ttl).await.unwrap();
    harness.cache.set("unrelated", b"{}", ttl).await.unwrap();

    let body: Value = reqwest::get(format!("{base}/api/v1/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["cache_entries"], 2);
    assert_eq!(body["data"]["pending"], 0);
}
