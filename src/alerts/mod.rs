//! Alerting: state machine, dispatch and notification senders
//!
//! The [`AlertDispatcher`] sits on the probing path. Every completed probe is
//! handed to [`StateTracker`], and every alert it emits is fanned out to all
//! registered [`Notifier`]s on detached tasks, so a slow or failing channel
//! never holds up a round or the other channels.
//!
//! ## Message Flow
//!
//! ```text
//! round task ──► AlertDispatcher::observe ──► StateTracker (lock, decide)
//!                        │
//!                        └──► spawn per notifier ──► Notifier::send (retries inside)
//! ```

pub mod discord;
pub mod message;
pub mod state;
pub mod webhook;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

pub use state::{AlertPolicy, ServiceState, StateTracker, Transition, transition};

use crate::config::{AlertTarget, NotifierConfig};
use crate::{ProbeOutcome, ProbeStatus, ServiceKey, SubStatus};

/// How often idle alert state is swept
const EVICTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Down,
    Up,
    ContinuousDown,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Down => "down",
            AlertKind::Up => "up",
            AlertKind::ContinuousDown => "continuous_down",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status transition worth telling someone about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    #[serde(flatten)]
    pub key: ServiceKey,
    #[serde(rename = "alert_type")]
    pub kind: AlertKind,
    #[serde(rename = "previous_status")]
    pub previous: ProbeStatus,
    #[serde(rename = "status")]
    pub current: ProbeStatus,
    pub sub_status: SubStatus,
    #[serde(rename = "latency")]
    pub latency_ms: u64,
    pub timestamp: i64,
    /// Failures in the current run; for `up`, the length of the run that ended
    pub failure_count: u32,
    /// Start of the failing run, epoch seconds
    pub down_since: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<NotifyError>,
    },
}

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;

    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Run `attempt` up to `retries + 1` times, sleeping `backoff * n` before the n-th retry.
pub(crate) async fn with_retry<F, Fut>(
    retries: u32,
    backoff: Duration,
    mut attempt: F,
) -> Result<(), NotifyError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), NotifyError>>,
{
    let mut last = None;
    for n in 0..=retries {
        if n > 0 {
            time::sleep(backoff * n).await;
        }
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!("attempt {} of {} failed: {}", n + 1, retries + 1, e);
                last = Some(e);
            }
        }
    }

    match last {
        Some(last) if retries > 0 => Err(NotifyError::RetriesExhausted {
            attempts: retries + 1,
            last: Box::new(last),
        }),
        Some(last) => Err(last),
        None => Ok(()),
    }
}

/// Turns probe outcomes into alerts and delivers them.
pub struct AlertDispatcher {
    tracker: StateTracker,
    notifiers: Vec<Arc<dyn Notifier>>,
    deliveries: TaskTracker,
    shutdown: CancellationToken,
}

impl AlertDispatcher {
    pub fn new(
        policy: AlertPolicy,
        notifiers: Vec<Arc<dyn Notifier>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tracker: StateTracker::new(policy),
            notifiers,
            deliveries: TaskTracker::new(),
            shutdown,
        }
    }

    /// Build the dispatcher and its senders from configuration.
    pub fn from_config(config: &NotifierConfig, shutdown: CancellationToken) -> Self {
        let notifiers = config
            .targets
            .iter()
            .map(|target| -> Arc<dyn Notifier> {
                match target {
                    AlertTarget::Discord(discord) => Arc::new(discord::DiscordNotifier::new(
                        discord.clone(),
                        config.timeout(),
                        config.retry_count,
                    )),
                    AlertTarget::Webhook(webhook) => Arc::new(webhook::WebhookNotifier::new(
                        webhook.url.clone(),
                        config.timeout(),
                        config.retry_count,
                    )),
                }
            })
            .collect::<Vec<_>>();

        info!("alerting enabled with {} notifier(s)", notifiers.len());
        Self::new(AlertPolicy::from(config), notifiers, shutdown)
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Swap threshold and cooldown. Series state is kept.
    pub fn update_config(&self, config: &NotifierConfig) {
        self.tracker.update_policy(AlertPolicy::from(config));
    }

    /// Feed one outcome; any resulting alert is dispatched without waiting.
    pub fn observe(&self, key: &ServiceKey, outcome: &ProbeOutcome) -> Option<Alert> {
        let alert = self.tracker.observe(key, outcome)?;
        info!("{}: {} alert ({})", alert.key, alert.kind, alert.current);
        self.dispatch(&alert);
        Some(alert)
    }

    fn dispatch(&self, alert: &Alert) {
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let alert = alert.clone();
            let shutdown = self.shutdown.clone();
            self.deliveries.spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        warn!("{}: delivery of {} alert for {} abandoned at shutdown", notifier.name(), alert.kind, alert.key);
                    }
                    result = notifier.send(&alert) => match result {
                        Ok(()) => info!("{}: sent {} alert for {}", notifier.name(), alert.kind, alert.key),
                        Err(e) => error!("{}: failed to send {} alert for {}: {}", notifier.name(), alert.kind, alert.key, e),
                    }
                }
            });
        }
    }

    /// Periodically drop idle alert state, until shutdown.
    pub fn spawn_eviction_task(self: &Arc<Self>, retention: Duration) -> JoinHandle<()> {
        self.spawn_eviction_task_every(EVICTION_INTERVAL, retention)
    }

    pub(crate) fn spawn_eviction_task_every(
        self: &Arc<Self>,
        every: Duration,
        retention: Duration,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = dispatcher.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let evicted = dispatcher.tracker.evict_idle(Utc::now(), retention);
                        if evicted > 0 {
                            debug!("evicted alert state of {} idle series", evicted);
                        }
                    }
                }
            }
        })
    }

    /// Wait for in-flight deliveries, then close every notifier.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.deliveries.close();
        if !self.deliveries.is_empty() {
            debug!("waiting for {} alert deliveries", self.deliveries.len());
        }
        self.deliveries.wait().await;

        for notifier in &self.notifiers {
            if let Err(e) = notifier.close().await {
                error!("failed to close notifier {}: {}", notifier.name(), e);
            }
        }
    }
}
