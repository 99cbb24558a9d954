//! Integration tests for probing rounds
//!
//! These tests verify that:
//! - A round probes every monitor over real HTTP and persists the outcomes
//! - Status changes between rounds reach the notifiers
//! - The concurrency bound holds end to end

use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_pulse::alerts::{AlertDispatcher, AlertPolicy};
use relay_pulse::probe::HttpProber;
use relay_pulse::scheduler::{SchedulerDeps, SchedulerHandle};
use relay_pulse::storage::{MemoryStore, ProbeStore};
use relay_pulse::{ProbeStatus, ServiceKey, SubStatus};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{CollectingNotifier, create_test_config, create_test_monitor, wait_for_rounds};

async fn mount(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_round_persists_classified_outcomes() {
    let server = MockServer::start().await;
    mount(&server, "/ok", 200).await;
    mount(&server, "/broken", 502).await;
    mount(&server, "/limited", 429).await;

    let config = Arc::new(create_test_config(vec![
        create_test_monitor("acme", "ok", &format!("{}/ok", server.uri())),
        create_test_monitor("acme", "broken", &format!("{}/broken", server.uri())),
        create_test_monitor("acme", "limited", &format!("{}/limited", server.uri())),
    ]));
    let store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();

    let scheduler = SchedulerHandle::start(
        SchedulerDeps {
            prober: Arc::new(HttpProber::new()),
            store: store.clone(),
            alerts: None,
        },
        config,
        Duration::from_secs(3600),
        &token,
    );

    assert!(wait_for_rounds(&scheduler, 1).await);

    let latest = |service: &'static str| {
        let store = store.clone();
        async move {
            store
                .latest(&ServiceKey::new("acme", service, ""))
                .await
                .unwrap()
                .unwrap()
                .outcome
        }
    };

    assert_eq!(latest("ok").await.status, ProbeStatus::Available);
    let broken = latest("broken").await;
    assert_eq!(broken.status, ProbeStatus::Unavailable);
    assert_eq!(broken.sub_status, SubStatus::ServerError);
    let limited = latest("limited").await;
    assert_eq!(limited.status, ProbeStatus::Unavailable);
    assert_eq!(limited.sub_status, SubStatus::RateLimit);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_outage_and_recovery_are_notified() {
    let server = MockServer::start().await;
    mount(&server, "/chat", 200).await;

    let config = Arc::new(create_test_config(vec![create_test_monitor(
        "acme",
        "chat",
        &format!("{}/chat", server.uri()),
    )]));
    let store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();
    let notifier = CollectingNotifier::new();
    let dispatcher = Arc::new(AlertDispatcher::new(
        AlertPolicy {
            failure_threshold: 2,
            min_notify_interval: Duration::ZERO,
        },
        vec![notifier.clone()],
        token.clone(),
    ));

    let scheduler = SchedulerHandle::start(
        SchedulerDeps {
            prober: Arc::new(HttpProber::new()),
            store: store.clone(),
            alerts: Some(dispatcher.clone()),
        },
        config,
        Duration::from_secs(3600),
        &token,
    );
    // baseline never alerts
    assert!(wait_for_rounds(&scheduler, 1).await);
    assert!(notifier.kinds().await.is_empty());

    server.reset().await;
    mount(&server, "/chat", 500).await;
    scheduler.trigger_now().await.unwrap();
    assert!(wait_for_rounds(&scheduler, 2).await);
    scheduler.trigger_now().await.unwrap();
    assert!(wait_for_rounds(&scheduler, 3).await);

    server.reset().await;
    mount(&server, "/chat", 200).await;
    scheduler.trigger_now().await.unwrap();
    assert!(wait_for_rounds(&scheduler, 4).await);

    assert!(notifier.wait_for(3).await);
    assert_eq!(
        notifier.kinds().await,
        vec!["down", "continuous_down", "up"]
    );
    let up = notifier.alerts.lock().await[2].clone();
    assert_eq!(up.failure_count, 2);
    assert_eq!(store.len().await, 4);

    scheduler.stop().await;
    dispatcher.close().await;
}

#[tokio::test]
async fn test_concurrency_bound_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let monitors = (0..6)
        .map(|i| create_test_monitor("acme", &format!("svc-{i}"), &server.uri()))
        .collect();
    let mut config = create_test_config(monitors);
    config.max_concurrency = 2;

    let store = Arc::new(MemoryStore::new());
    let token = CancellationToken::new();
    let started = Instant::now();
    let scheduler = SchedulerHandle::start(
        SchedulerDeps {
            prober: Arc::new(HttpProber::new()),
            store: store.clone(),
            alerts: None,
        },
        Arc::new(config),
        Duration::from_secs(3600),
        &token,
    );

    assert!(wait_for_rounds(&scheduler, 1).await);

    // three waves of two
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(store.len().await, 6);
    assert_eq!(scheduler.stats().probes_completed, 6);

    token.cancel();
    scheduler.stop().await;
}
