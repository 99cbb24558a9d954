//! Integration tests for alert delivery
//!
//! These tests verify that:
//! - Dispatchers built from configuration deliver to every target
//! - Cooldown suppresses repeated alerts across kinds
//! - A failing target does not affect the others

use std::time::Duration;

use chrono::Utc;
use relay_pulse::alerts::AlertDispatcher;
use relay_pulse::config::{AlertTarget, Discord, NotifierConfig, Webhook};
use relay_pulse::{ProbeOutcome, ProbeStatus, ServiceKey, SubStatus};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::wait_until;

fn outcome(status: ProbeStatus, sub_status: SubStatus) -> ProbeOutcome {
    ProbeOutcome::new(status, sub_status, 42, Utc::now().timestamp())
}

fn notifier_config(targets: Vec<AlertTarget>, cooldown_secs: u64) -> NotifierConfig {
    NotifierConfig {
        enabled: true,
        continuous_failure_threshold: 3,
        min_notify_interval: cooldown_secs,
        timeout_secs: 2,
        retry_count: 0,
        targets,
        ..NotifierConfig::default()
    }
}

async fn received(server: &MockServer, route: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_down_alert_reaches_all_targets() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/discord"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let config = notifier_config(
        vec![
            AlertTarget::Webhook(Webhook {
                url: format!("{}/webhook", server.uri()),
            }),
            AlertTarget::Discord(Discord {
                url: format!("{}/discord", server.uri()),
                user_id: Some("1234".into()),
            }),
        ],
        0,
    );
    let dispatcher = AlertDispatcher::from_config(&config, CancellationToken::new());
    let key = ServiceKey::new("acme", "chat", "vip");

    dispatcher.observe(&key, &outcome(ProbeStatus::Available, SubStatus::None));
    let alert = dispatcher
        .observe(&key, &outcome(ProbeStatus::Unavailable, SubStatus::AuthError))
        .expect("down alert");
    assert_eq!(alert.failure_count, 1);

    let srv = &server;
    let delivered = wait_until(Duration::from_secs(5), || async move {
        srv.received_requests().await.unwrap_or_default().len() == 2
    })
    .await;
    assert!(delivered);

    let webhook = received(&server, "/webhook").await;
    assert_eq!(webhook[0]["alert"]["alert_type"], "down");
    assert_eq!(webhook[0]["alert"]["provider"], "acme");
    assert_eq!(webhook[0]["alert"]["channel"], "vip");
    assert_eq!(webhook[0]["alert"]["sub_status"], "auth_error");

    let discord = received(&server, "/discord").await;
    assert_eq!(discord[0]["content"], "`acme / chat / vip` <@1234>");
    assert_eq!(discord[0]["embeds"][0]["title"], "🔴 Service Down");
}

#[tokio::test]
async fn test_cooldown_spans_alert_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = notifier_config(
        vec![AlertTarget::Webhook(Webhook { url: server.uri() })],
        300,
    );
    let dispatcher = AlertDispatcher::from_config(&config, CancellationToken::new());
    let key = ServiceKey::new("acme", "chat", "");

    dispatcher.observe(&key, &outcome(ProbeStatus::Available, SubStatus::None));
    assert!(dispatcher
        .observe(&key, &outcome(ProbeStatus::Unavailable, SubStatus::ServerError))
        .is_some());
    // threshold reached, but still inside the cooldown of the down alert
    for _ in 0..3 {
        assert!(dispatcher
            .observe(&key, &outcome(ProbeStatus::Unavailable, SubStatus::ServerError))
            .is_none());
    }
    assert!(dispatcher
        .observe(&key, &outcome(ProbeStatus::Available, SubStatus::None))
        .is_none());

    let state = dispatcher.tracker().state(&key).unwrap();
    assert_eq!(state.failure_count, 0);
    assert_eq!(state.last_status, ProbeStatus::Available);
}

#[tokio::test]
async fn test_failing_target_does_not_block_others() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/fine"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = notifier_config(
        vec![
            AlertTarget::Webhook(Webhook {
                url: format!("{}/broken", server.uri()),
            }),
            AlertTarget::Webhook(Webhook {
                url: format!("{}/fine", server.uri()),
            }),
        ],
        0,
    );
    let dispatcher = AlertDispatcher::from_config(&config, CancellationToken::new());
    let key = ServiceKey::new("acme", "chat", "");

    dispatcher.observe(&key, &outcome(ProbeStatus::Available, SubStatus::None));
    dispatcher.observe(&key, &outcome(ProbeStatus::Unavailable, SubStatus::NetworkError));

    let srv = &server;
    let delivered = wait_until(Duration::from_secs(5), || async move {
        !received(srv, "/fine").await.is_empty()
    })
    .await;
    assert!(delivered);
}
