//! Status queries over probe history
//!
//! [`StatusService`] turns a `(period, provider, service)` request into the
//! serialized status document served by the API:
//!
//! ```json
//! {
//!   "meta": { "period": "24h", "count": 1, "slow_latency_ms": 5000 },
//!   "data": [{
//!     "provider": "Acme", "provider_slug": "acme", "service": "chat", ...
//!     "current_status": { "status": 1, "latency": 230, "timestamp": 1700000000 },
//!     "timeline": [ { "time": "14:00", "availability": 100.0, ... }, ... ]
//!   }]
//! }
//! ```
//!
//! Documents are built from scratch on every miss; [`StatusService::load`]
//! puts the response cache in front so concurrent identical requests share
//! one build.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::aggregate::{Period, TimePoint, build_timeline};
use crate::cache::{CacheError, ResponseCache, cache_key};
use crate::config::{AppConfig, Category, ServiceConfig};
use crate::storage::ProbeStore;

/// Wildcard accepted for both the provider and the service filter.
pub const ALL: &str = "all";

#[derive(Debug, Clone, Serialize)]
pub struct StatusMeta {
    pub period: &'static str,
    pub count: usize,
    pub slow_latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurrentStatus {
    pub status: u8,
    pub latency: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub provider: String,
    pub provider_slug: String,
    pub provider_url: String,
    pub service: String,
    pub category: Category,
    pub sponsor: String,
    pub sponsor_url: String,
    pub channel: String,
    pub current_status: Option<CurrentStatus>,
    pub timeline: Vec<TimePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub meta: StatusMeta,
    pub data: Vec<MonitorStatus>,
}

/// Monitors matching the filters, first occurrence of each series only.
///
/// `provider` is compared case-insensitively and may also be a provider slug.
pub fn select_monitors<'a>(
    config: &'a AppConfig,
    provider: &str,
    service: &str,
) -> Vec<&'a ServiceConfig> {
    let provider = provider.trim().to_lowercase();
    let provider = config
        .provider_for_slug(&provider)
        .map(|p| p.trim().to_lowercase())
        .unwrap_or(provider);
    let service = service.trim();

    let mut seen = HashSet::new();
    config
        .monitors
        .iter()
        .filter(|m| provider == ALL || m.provider.trim().to_lowercase() == provider)
        .filter(|m| service == ALL || m.service == service)
        .filter(|m| seen.insert(m.key()))
        .collect()
}

pub struct StatusService {
    config: RwLock<Arc<AppConfig>>,
    store: Arc<dyn ProbeStore>,
    cache: ResponseCache,
}

impl StatusService {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn ProbeStore>) -> Self {
        Self::with_cache(config, store, ResponseCache::default())
    }

    pub fn with_cache(
        config: Arc<AppConfig>,
        store: Arc<dyn ProbeStore>,
        cache: ResponseCache,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            cache,
        }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subsequent builds use `config`. Cached documents age out on their own.
    pub fn update_config(&self, config: Arc<AppConfig>) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn store(&self) -> &Arc<dyn ProbeStore> {
        &self.store
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Serialized status document, served from the cache when fresh.
    pub async fn load(
        self: &Arc<Self>,
        period: Period,
        provider: &str,
        service: &str,
    ) -> Result<Vec<u8>, CacheError> {
        let key = cache_key(period, provider, service);
        let service_ref = self.clone();
        let provider = provider.to_string();
        let service = service.to_string();

        self.cache
            .get_or_load(&key, move || async move {
                let response = service_ref
                    .query_at(period, &provider, &service, Utc::now())
                    .await?;
                Ok(serde_json::to_vec(&response)?)
            })
            .await
    }

    pub async fn query(
        &self,
        period: Period,
        provider: &str,
        service: &str,
    ) -> anyhow::Result<StatusResponse> {
        self.query_at(period, provider, service, Utc::now()).await
    }

    /// Build the status document as of `now`.
    #[instrument(skip(self, now))]
    pub async fn query_at(
        &self,
        period: Period,
        provider: &str,
        service: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<StatusResponse> {
        let config = self.config();
        let monitors: Vec<ServiceConfig> = select_monitors(&config, provider, service)
            .into_iter()
            .cloned()
            .collect();
        let since = period.since(now);
        let weight = config.degraded_weight;

        let data = if config.enable_concurrent_query {
            let limit = config.concurrent_query_limit.max(1);
            // `buffered` keeps the configured monitor order
            stream::iter(monitors)
                .map(move |monitor| async move {
                    self.monitor_status(&monitor, period, since, weight, now)
                        .await
                })
                .buffered(limit)
                .try_collect::<Vec<_>>()
                .await?
        } else {
            let mut data = Vec::with_capacity(monitors.len());
            for monitor in &monitors {
                data.push(self.monitor_status(monitor, period, since, weight, now).await?);
            }
            data
        };

        debug!(
            "status built: {} series (concurrent: {})",
            data.len(),
            config.enable_concurrent_query
        );

        Ok(StatusResponse {
            meta: StatusMeta {
                period: period.as_str(),
                count: data.len(),
                slow_latency_ms: config.slow_latency_ms,
            },
            data,
        })
    }

    async fn monitor_status(
        &self,
        monitor: &ServiceConfig,
        period: Period,
        since: i64,
        degraded_weight: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<MonitorStatus> {
        let key = monitor.key();
        let latest = self
            .store
            .latest(&key)
            .await
            .with_context(|| format!("latest record of {key}"))?;
        let history = self
            .store
            .history(&key, since)
            .await
            .with_context(|| format!("history of {key}"))?;

        let timeline = build_timeline(
            history.iter().map(|record| &record.outcome),
            period,
            degraded_weight,
            now,
        );

        let provider_slug = if monitor.provider_slug.is_empty() {
            monitor.provider.trim().to_lowercase()
        } else {
            monitor.provider_slug.clone()
        };

        Ok(MonitorStatus {
            provider: monitor.provider.clone(),
            provider_slug,
            provider_url: monitor.provider_url.clone().unwrap_or_default(),
            service: monitor.service.clone(),
            category: monitor.category,
            sponsor: monitor.sponsor.clone(),
            sponsor_url: monitor.sponsor_url.clone().unwrap_or_default(),
            channel: monitor.channel.clone(),
            current_status: latest.map(|record| CurrentStatus {
                status: record.outcome.status.into(),
                latency: record.outcome.latency_ms,
                timestamp: record.outcome.timestamp,
            }),
            timeline,
        })
    }
}
