use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use super::message::render;
use super::{Alert, Notifier, NotifyError, with_retry};

/// Posts alerts as JSON to a generic webhook.
///
/// The payload is the serialized [`Alert`] plus a rendered `message`:
///
/// ```json
/// {
///   "message": "**🔴 Service Down**: `acme / chat` ...",
///   "alert": { "provider": "acme", "alert_type": "down", "status": 0, ... }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    retries: u32,
    backoff: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration, retries: u32) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url,
            retries,
            backoff: Duration::from_secs(1),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip_all, fields(key = %alert.key, kind = %alert.kind))]
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let payload = json!({
            "message": render(alert),
            "alert": alert,
        });
        with_retry(self.retries, self.backoff, || self.post(&payload)).await?;
        debug!("webhook delivered");
        Ok(())
    }
}
