//! Integration tests for the scaler API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use scaler_agent::api::{create_router, AppState};
use scaler_lib::{
    health::HealthRegistry,
    observability::ScalerMetrics,
    DecisionOutcome, RunSummary,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    let metrics = ScalerMetrics::new();
    let state = Arc::new(AppState::new(health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_degraded_after_failed_run() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_run(&RunSummary {
            targets_processed: 2,
            scales_failed: 1,
            ..Default::default()
        })
        .await;

    let (status, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["engine"]["status"], "degraded");
    assert_eq!(health["last_run"]["scales_failed"], 1);
}

#[tokio::test]
async fn test_healthz_returns_503_when_cluster_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .record_cluster_error("API server unreachable")
        .await;

    let (status, body) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;
    state
        .health_registry
        .record_cluster_error("connection refused")
        .await;

    let (status, body) = get(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(readiness["reason"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.inc_runs();
    state.metrics.record_decision(DecisionOutcome::Applied);
    state.metrics.record_skipped_by_cap(2);
    state.metrics.record_run(&RunSummary::default(), 1.5);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("workload_scaler_runs_total"));
    assert!(metrics_text.contains("workload_scaler_decisions_total"));
    assert!(metrics_text.contains(r#"workload_scaler_decisions_total{outcome="skipped_by_cap"}"#));
    assert!(metrics_text.contains("workload_scaler_run_duration_seconds_bucket"));
    assert!(metrics_text.contains("workload_scaler_run_duration_seconds_count"));
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state) = setup_test_app().await;

    let (_, body) = get(app, "/healthz").await;
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert!(health["components"]["engine"].is_object());
    assert!(health["components"]["cluster"].is_object());
    assert!(health["components"]["metrics_source"].is_object());
}
