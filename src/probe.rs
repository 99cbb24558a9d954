//! Probe execution
//!
//! A probe sends the configured request once and condenses the response into
//! a [`ProbeOutcome`]. Probes never fail: transport errors, timeouts and bad
//! responses all become an unavailable outcome with a sub-status saying why.
//!
//! ```text
//! transport error / timeout        → red    network_error   (latency 0)
//! 2xx, expected text missing       → red    content_mismatch
//! 2xx, slower than slow_latency    → yellow slow_latency
//! 2xx                              → green
//! 429                              → red    rate_limit
//! 401, 403                         → red    auth_error
//! 400                              → red    invalid_request
//! other 4xx                        → red    client_error
//! 5xx and anything else            → red    server_error
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, instrument, trace, warn};

use crate::config::{HttpMethod, ServiceConfig};
use crate::{ProbeOutcome, ProbeStatus, SubStatus};

/// Executes single checks against a monitored endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, service: &ServiceConfig) -> ProbeOutcome;

    /// Release resources at shutdown.
    async fn close(&self) {}
}

/// Reqwest-backed prober sharing one connection pool across all monitors.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProber {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("relay-pulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!("failed to build HTTP client, using defaults: {}", e);
                Client::new()
            });
        Self { client }
    }

    /// Returns (status_code, body)
    async fn execute_request(&self, service: &ServiceConfig) -> reqwest::Result<(u16, String)> {
        let mut request = self
            .client
            .request(service.method.into(), &service.url)
            .timeout(service.timeout());

        for (name, value) in &service.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &service.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let status_code = response.status().as_u16();

        let body = if matches!(service.method, HttpMethod::Head) || service.success_contains.is_none()
        {
            String::new()
        } else {
            response.text().await?
        };

        Ok((status_code, body))
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip_all, fields(key = %service.key()))]
    async fn probe(&self, service: &ServiceConfig) -> ProbeOutcome {
        let timestamp = Utc::now().timestamp();
        let start = Instant::now();

        match self.execute_request(service).await {
            Ok((status_code, body)) => {
                let latency = start.elapsed();
                let content_ok = service
                    .success_contains
                    .as_deref()
                    .is_none_or(|needle| body.contains(needle));
                let (status, sub_status) =
                    classify(status_code, content_ok, latency, service.slow_latency());
                trace!("{} in {:?} → {} {}", status_code, latency, status, sub_status);

                ProbeOutcome {
                    status,
                    sub_status,
                    latency_ms: latency.as_millis() as u64,
                    timestamp,
                }
            }
            Err(e) => {
                debug!("request failed: {}", e);
                ProbeOutcome::new(ProbeStatus::Unavailable, SubStatus::NetworkError, 0, timestamp)
            }
        }
    }
}

/// Map an HTTP response to a status.
pub fn classify(
    status_code: u16,
    content_ok: bool,
    latency: Duration,
    slow_latency: Duration,
) -> (ProbeStatus, SubStatus) {
    match status_code {
        200..=299 if !content_ok => (ProbeStatus::Unavailable, SubStatus::ContentMismatch),
        200..=299 if latency > slow_latency => (ProbeStatus::Degraded, SubStatus::SlowLatency),
        200..=299 => (ProbeStatus::Available, SubStatus::None),
        429 => (ProbeStatus::Unavailable, SubStatus::RateLimit),
        401 | 403 => (ProbeStatus::Unavailable, SubStatus::AuthError),
        400 => (ProbeStatus::Unavailable, SubStatus::InvalidRequest),
        402..=499 => (ProbeStatus::Unavailable, SubStatus::ClientError),
        _ => (ProbeStatus::Unavailable, SubStatus::ServerError),
    }
}
