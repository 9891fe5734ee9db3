//! HTTP 路由测试：直接用 tower 的 oneshot 驱动 Router，不监听端口

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use yuanjing_gate::api::{app, AppState};
use yuanjing_gate::cache::IdempotencyCache;
use yuanjing_gate::fingerprint;
use yuanjing_gate::registry::HashRegistry;
use yuanjing_gate::ProvenanceGate;

fn state() -> Arc<AppState> {
    Arc::new(AppState {
        gate: ProvenanceGate::new(HashRegistry::temporary().unwrap()),
        idempotency: IdempotencyCache::new(Duration::from_secs(60), 16),
    })
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(Arc::clone(state)).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn classify_accepts_loose_flags() {
    let state = state();
    let (status, body) = send(
        &state,
        post("/classify", json!({"is_ai_generated": "yes", "is_animation": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["groupId"], 1);
    assert_eq!(body["requiredAction"], "none");
    assert_eq!(body["licensePolicy"], "fixedAiTraining");
}

#[tokio::test]
async fn check_after_capture_reports_exact_match() {
    let state = state();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dragon.png");
    let image = common::textured_png(64, 64, 1);
    std::fs::write(&path, &image).unwrap();

    state
        .gate
        .capture(Arc::from(image), serde_json::from_value(json!({"title": "Dragon Art"})).unwrap())
        .await
        .unwrap();

    let (status, body) = send(&state, post("/check", json!({"image_path": path}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], true);
    assert_eq!(body["tier"], "exact");
    assert_eq!(body["matchedEntry"]["metadata"]["title"], "Dragon Art");
}

#[tokio::test]
async fn missing_image_is_bad_request() {
    let state = state();
    let (status, _) = send(&state, post("/check", json!({"image_path": "/nonexistent/x.png"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn evaluate_replays_cached_decision_for_same_key() {
    let state = state();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("face.png");
    std::fs::write(&path, common::textured_png(32, 32, 4)).unwrap();

    let request = |flags: Value| {
        Request::builder()
            .method("POST")
            .uri("/evaluate")
            .header("content-type", "application/json")
            .header("Idempotency-Key", "req-1")
            .body(Body::from(json!({"image_path": path, "flags": flags}).to_string()))
            .unwrap()
    };

    let (_, first) = send(&state, request(json!({"has_human_face": true, "is_full_face_visible": true}))).await;
    assert_eq!(first, json!({"disposition": "requireSelfie", "groupId": 10}));

    // 同一个 Key，不同参数：仍然返回第一次的结果
    let (_, second) = send(&state, request(json!({"is_ai_generated": true}))).await;
    assert_eq!(second, first);
}

#[tokio::test]
async fn watermark_embed_then_extract() {
    let state = state();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.png");
    let output = dir.path().join("out.png");
    std::fs::write(&input, common::textured_png(100, 100, 8)).unwrap();

    let payload = json!({
        "assetId": "ip-1",
        "licenseTerms": "commercial_remix",
        "copyrightInfo": "(c) test",
        "metadata": {"chain": "story"},
        "timestamp": 1_750_000_000
    });
    let (status, body) = send(
        &state,
        post("/watermark/embed", json!({"image_path": input, "output_path": output, "payload": payload})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["bytes_written"].as_u64().unwrap() > 0);

    let (_, extracted) = send(&state, post("/watermark/extract", json!({"image_path": output}))).await;
    assert_eq!(extracted["found"], true);
    assert_eq!(extracted["payload"], payload);

    let (_, plain) = send(&state, post("/watermark/extract", json!({"image_path": input}))).await;
    assert_eq!(plain, json!({"found": false}));
}

#[tokio::test]
async fn admin_list_delete_and_clear() {
    let state = state();
    let image = common::textured_png(24, 24, 6);
    let hash = fingerprint::exact_hash(&image);
    state
        .gate
        .capture(Arc::from(image), Default::default())
        .await
        .unwrap();

    let (_, listed) = send(
        &state,
        Request::builder().uri("/admin/entries").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(listed["total"], 1);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/entries/{hash}"))
        .body(Body::empty())
        .unwrap();
    let (_, deleted) = send(&state, delete).await;
    assert_eq!(deleted["success"], true);

    let bad = Request::builder()
        .method("DELETE")
        .uri("/admin/entries/not-a-hash")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, cleared) = send(&state, post("/admin/clear", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["success"], true);
    assert!(state.gate.registry().is_empty());
}
