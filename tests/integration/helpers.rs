//! Helper functions for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_pulse::alerts::{Alert, Notifier, NotifyError};
use relay_pulse::scheduler::SchedulerHandle;
use relay_pulse::config::{
    ApiSettings, AppConfig, Category, HttpMethod, NotifierConfig, ServiceConfig, StorageConfig,
};
use tokio::sync::Mutex;

pub fn create_test_monitor(provider: &str, service: &str, url: &str) -> ServiceConfig {
    ServiceConfig {
        provider: provider.to_string(),
        provider_slug: provider.to_lowercase(),
        provider_url: None,
        service: service.to_string(),
        category: Category::Public,
        sponsor: "tester".to_string(),
        sponsor_url: None,
        channel: String::new(),
        url: url.to_string(),
        method: HttpMethod::Get,
        headers: Default::default(),
        body: None,
        success_contains: None,
        api_key: None,
        timeout_secs: 2,
        slow_latency_ms: None,
    }
}

pub fn create_test_config(monitors: Vec<ServiceConfig>) -> AppConfig {
    AppConfig {
        interval: 60,
        slow_latency_ms: 5000,
        degraded_weight: 0.7,
        max_concurrency: 10,
        stagger_probes: false,
        enable_concurrent_query: false,
        concurrent_query_limit: 10,
        storage: StorageConfig::None,
        notifier: NotifierConfig::default(),
        api: ApiSettings::default(),
        monitors,
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Wait until `scheduler` has completed at least `rounds` rounds.
pub async fn wait_for_rounds(scheduler: &SchedulerHandle, rounds: u64) -> bool {
    wait_until(Duration::from_secs(10), || async move {
        scheduler.stats().rounds_completed >= rounds
    })
    .await
}

/// Notifier that keeps every alert it receives.
#[derive(Default)]
pub struct CollectingNotifier {
    pub alerts: Mutex<Vec<Alert>>,
}

impl CollectingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn kinds(&self) -> Vec<String> {
        self.alerts
            .lock()
            .await
            .iter()
            .map(|a| a.kind.to_string())
            .collect()
    }

    pub async fn wait_for(&self, count: usize) -> bool {
        wait_until(Duration::from_secs(5), || async move {
            self.alerts.lock().await.len() >= count
        })
        .await
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}
