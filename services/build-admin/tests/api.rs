//! Router-level tests of the RPC surface.

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use buildadmin_server::api::create_router;
use buildadmin_server::cleanup::ObsoleteDataCollector;
use buildadmin_server::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{gc_config, harness, Harness};

fn router(h: &Harness) -> Router {
    let collector = Arc::new(ObsoleteDataCollector::new(
        gc_config(3, 1),
        h.orchestrator.registry().clone(),
        h.store.clone(),
    ));
    create_router(AppState::new(h.orchestrator.clone(), collector))
}

async fn ready_router() -> (Harness, Router) {
    let h = harness();
    h.orchestrator.recover().await.unwrap();
    let app = router(&h);
    (h, app)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn readyz_reports_recovering_until_recovery_finishes() {
    let h = harness();
    let app = router(&h);

    let response = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "recovering");

    h.orchestrator.recover().await.unwrap();
    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mutations_are_refused_during_recovery() {
    let h = harness();
    let app = router(&h);

    let response = app
        .oneshot(post(
            "/v1/builds/start",
            json!({"build_id": "shop:orders:1", "config_path": "/c"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error_code"], 6);
    assert_eq!(h.factory.create_calls(), 0);
}

#[tokio::test]
async fn start_then_stop_round_trip() {
    let (h, app) = ready_router().await;

    let response = app
        .clone()
        .oneshot(post(
            "/v1/builds/start",
            json!({"build_id": "shop:orders:1", "config_path": "/c"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["error_code"], 0);
    assert_eq!(body["build_id"], "shop:orders:1");

    let response = app
        .clone()
        .oneshot(post(
            "/v1/builds/start",
            json!({"build_id": "shop:orders:1", "config_path": "/c"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error_code"], 3);

    let response = app
        .clone()
        .oneshot(post("/v1/builds/stop", json!({"job_id": "orders", "fuzzy": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["build_id"], "shop:orders:1");
    assert_eq!(h.orchestrator.registry().active_count(), 0);

    let response = app
        .oneshot(get("/v1/service-info?include_stopped=true"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["generations"][0]["build_id"], "shop:orders:1");
    assert_eq!(body["pending_deletions"], 0);
}

#[tokio::test]
async fn unknown_generation_is_not_found() {
    let (_h, app) = ready_router().await;

    let response = app
        .oneshot(post("/v1/builds/stop", json!({"build_id": "shop:orders:9"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error_code"], 2);
    assert!(body["error_messages"][0].as_str().unwrap().contains("shop:orders:9"));
}

#[tokio::test]
async fn malformed_build_id_is_invalid_parameter() {
    let (_h, app) = ready_router().await;

    let response = app
        .oneshot(post(
            "/v1/builds/start",
            json!({"build_id": "not-a-build-id", "config_path": "/c"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error_code"], 1);
}

#[tokio::test]
async fn clean_versions_is_queued() {
    let (h, app) = ready_router().await;
    h.orchestrator
        .start(
            common::id("shop:orders:1"),
            buildadmin_server::orchestrator::StartParams::new("/c"),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post(
            "/v1/builds/clean-versions",
            json!({"build_id": "shop:orders:1", "cluster": "east", "version": 12}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(app.oneshot(get("/v1/service-info")).await.unwrap()).await;
    assert_eq!(body["pending_deletions"], 1);
}

#[tokio::test]
async fn clean_versions_accepts_job_id_of_stopped_generation() {
    let (h, app) = ready_router().await;
    for generation in ["shop:orders:1", "shop:orders:2"] {
        h.orchestrator
            .start(
                common::id(generation),
                buildadmin_server::orchestrator::StartParams::new("/c"),
            )
            .await
            .unwrap();
    }
    h.orchestrator
        .stop(&buildadmin_server::registry::JobSelector::id(common::id("shop:orders:1")))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post(
            "/v1/builds/clean-versions",
            json!({"job_id": "orders:1", "fuzzy": true, "cluster": "east", "version": 3}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["build_id"], "shop:orders:1");

    let response = app
        .clone()
        .oneshot(post(
            "/v1/builds/clean-versions",
            json!({"job_id": "shop:orders:*", "fuzzy": true, "cluster": "east", "version": 3}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error_code"], 4);

    let body = json_body(app.oneshot(get("/v1/service-info")).await.unwrap()).await;
    assert_eq!(body["pending_deletions"], 1);
}
