//! Integration tests for config hot reload
//!
//! These tests verify that:
//! - An edited config file reaches a running scheduler
//! - A broken edit leaves the running config untouched

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use relay_pulse::config::AppConfig;
use relay_pulse::probe::HttpProber;
use relay_pulse::scheduler::{SchedulerDeps, SchedulerHandle};
use relay_pulse::storage::{MemoryStore, ProbeStore};
use relay_pulse::watcher::ConfigWatcher;
use relay_pulse::ServiceKey;
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{wait_for_rounds, wait_until};

fn write_config(path: &Path, url: &str, services: &[&str]) {
    let monitors: Vec<_> = services
        .iter()
        .map(|service| {
            json!({
                "provider": "acme",
                "service": service,
                "category": "public",
                "sponsor": "tester",
                "url": url,
            })
        })
        .collect();
    let config = json!({
        "interval": 3600,
        "stagger_probes": false,
        "storage": { "backend": "none" },
        "monitors": monitors,
    });
    std::fs::write(path, config.to_string()).unwrap();
}

#[tokio::test]
async fn test_reload_reaches_scheduler() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    write_config(&path, &server.uri(), &["chat"]);

    let token = CancellationToken::new();
    let config = Arc::new(AppConfig::load(&path).unwrap());
    let store = Arc::new(MemoryStore::new());
    let scheduler = SchedulerHandle::start(
        SchedulerDeps {
            prober: Arc::new(HttpProber::new()),
            store: store.clone(),
            alerts: None,
        },
        config.clone(),
        config.cadence(),
        &token,
    );
    assert!(wait_for_rounds(&scheduler, 1).await);

    let mut reloads = ConfigWatcher::new(&path)
        .with_debounce(Duration::from_millis(50))
        .spawn(token.clone())
        .unwrap();

    // broken edits are dropped by the watcher
    std::fs::write(&path, "{\"monitors\": []}").unwrap();
    let rejected = tokio::time::timeout(Duration::from_millis(500), reloads.recv()).await;
    assert!(rejected.is_err());
    assert_eq!(scheduler.config().monitors.len(), 1);

    write_config(&path, &server.uri(), &["chat", "embed"]);
    let next = tokio::time::timeout(Duration::from_secs(5), reloads.recv())
        .await
        .unwrap()
        .unwrap();
    scheduler.update_config(next).await.unwrap();
    scheduler.trigger_now().await.unwrap();
    assert!(wait_for_rounds(&scheduler, 2).await);

    let embed = &ServiceKey::new("acme", "embed", "");
    let st = &store;
    let seen = wait_until(Duration::from_secs(5), || async move {
        st.latest(embed).await.unwrap().is_some()
    })
    .await;
    assert!(seen);
    assert_eq!(scheduler.config().monitors.len(), 2);

    scheduler.stop().await;
    token.cancel();
}
