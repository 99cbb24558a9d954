//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - The status endpoint serves the cached document with CDN headers
//! - Invalid periods are rejected before touching storage
//! - Health reflects the storage backend

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use relay_pulse::api::{ApiState, spawn_api_server};
use relay_pulse::query::StatusService;
use relay_pulse::storage::{MemoryStore, ProbeStore};
use relay_pulse::{ProbeOutcome, ProbeStatus, ServiceKey, SubStatus};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::helpers::{create_test_config, create_test_monitor};

// Helper to create test API server
async fn spawn_test_api(store: Arc<MemoryStore>, token: &CancellationToken) -> SocketAddr {
    let mut acme = create_test_monitor("Acme Relay", "chat", "https://acme.example/");
    acme.provider_slug = "acme".into();
    let config = Arc::new(create_test_config(vec![
        acme,
        create_test_monitor("Beta", "chat", "https://beta.example/"),
    ]));
    let status = Arc::new(StatusService::new(config, store));

    spawn_api_server(
        "127.0.0.1:0".parse().unwrap(), // Random port
        ApiState::new(status),
        token.clone(),
    )
    .await
    .unwrap()
}

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now().timestamp();
    store
        .insert(
            ServiceKey::new("Acme Relay", "chat", ""),
            ProbeOutcome::new(ProbeStatus::Available, SubStatus::None, 321, now - 30),
        )
        .await;
    store
}

#[tokio::test]
async fn test_status_endpoint_returns_document() {
    let token = CancellationToken::new();
    let addr = spawn_test_api(seeded_store().await, &token).await;

    let response = reqwest::get(format!("http://{addr}/api/status?period=24h&provider=acme"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["cache-control"],
        "public, max-age=60, s-maxage=60"
    );
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json")
    );

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["meta"]["period"], "24h");
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["provider"], "Acme Relay");
    assert_eq!(body["data"][0]["current_status"]["latency"], 321);
    assert_eq!(body["data"][0]["timeline"].as_array().unwrap().len(), 24);

    token.cancel();
}

#[tokio::test]
async fn test_status_defaults_to_all_providers() {
    let token = CancellationToken::new();
    let addr = spawn_test_api(seeded_store().await, &token).await;

    let body: Value = reqwest::get(format!("http://{addr}/api/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["meta"]["count"], 2);
    assert!(body["data"][1]["current_status"].is_null());

    let body: Value = reqwest::get(format!("http://{addr}/api/status?period=1d"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["meta"]["period"], "24h");

    token.cancel();
}

#[tokio::test]
async fn test_invalid_period_is_rejected() {
    let token = CancellationToken::new();
    let addr = spawn_test_api(seeded_store().await, &token).await;

    let response = reqwest::get(format!("http://{addr}/api/status?period=90d"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("90d"));

    token.cancel();
}

#[tokio::test]
async fn test_health_endpoint() {
    let token = CancellationToken::new();
    let store = seeded_store().await;
    let addr = spawn_test_api(store.clone(), &token).await;

    let response = reqwest::get(format!("http://{addr}/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    store.close().await.unwrap();
    let response = reqwest::get(format!("http://{addr}/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert!(!body["storage"]["message"].as_str().unwrap().is_empty());

    token.cancel();
}
