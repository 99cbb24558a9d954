//! Per-series alert state machine
//!
//! Every probe outcome of a series moves its state along this table
//! (P = previous status, C = current status):
//!
//! ```text
//! no state        → baseline only, never alerts (failure run starts if C is red)
//! P up,   C red   → failure_count = 1                       → `down`
//! P red,  C red   → failure_count += 1, at == threshold     → `continuous_down`
//! P red,  C up    → failure_count = 0                       → `up`
//! P up,   C up    → state updated, no alert (green ↔ yellow included)
//! ```
//!
//! Every alert is additionally subject to one cooldown shared by all alert
//! kinds of the series: nothing is emitted while `now - last_notify` is below
//! the configured interval. A series that was never notified is never in
//! cooldown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::{Alert, AlertKind};
use crate::config::NotifierConfig;
use crate::{ProbeOutcome, ProbeStatus, ServiceKey};

/// Thresholds that decide whether a transition is announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub failure_threshold: u32,
    pub min_notify_interval: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            min_notify_interval: Duration::from_secs(300),
        }
    }
}

impl From<&NotifierConfig> for AlertPolicy {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            failure_threshold: config.continuous_failure_threshold,
            min_notify_interval: config.min_notify_interval(),
        }
    }
}

/// What happened between two consecutive outcomes of one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First outcome ever seen for the series
    Baseline,
    WentDown,
    StillDown,
    Recovered,
    /// Both up (available or degraded)
    Steady,
}

pub fn transition(previous: Option<ProbeStatus>, current: ProbeStatus) -> Transition {
    match (previous.map(ProbeStatus::is_up), current.is_up()) {
        (None, _) => Transition::Baseline,
        (Some(true), false) => Transition::WentDown,
        (Some(false), false) => Transition::StillDown,
        (Some(false), true) => Transition::Recovered,
        (Some(true), true) => Transition::Steady,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub last_status: ProbeStatus,
    /// `None` until the first alert of the series was emitted
    pub last_notify: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub first_fail: Option<DateTime<Utc>>,
}

impl ServiceState {
    fn baseline(status: ProbeStatus, now: DateTime<Utc>) -> Self {
        let down = !status.is_up();
        Self {
            last_status: status,
            last_notify: None,
            failure_count: u32::from(down),
            first_fail: down.then_some(now),
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let Some(last) = self.last_notify else {
            return false;
        };
        (now - last)
            .to_std()
            .map(|elapsed| elapsed < interval)
            // clock went backwards: treat as still cooling down
            .unwrap_or(true)
    }
}

/// Owns the per-series state of every monitored series.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: Mutex<HashMap<ServiceKey, ServiceState>>,
    policy: RwLock<AlertPolicy>,
}

impl StateTracker {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            policy: RwLock::new(policy),
        }
    }

    pub fn policy(&self) -> AlertPolicy {
        *self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_policy(&self, policy: AlertPolicy) {
        debug!(
            "alert policy updated: threshold {}, cooldown {:?}",
            policy.failure_threshold, policy.min_notify_interval
        );
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn observe(&self, key: &ServiceKey, outcome: &ProbeOutcome) -> Option<Alert> {
        self.observe_at(key, outcome, Utc::now())
    }

    /// Feed one outcome and return the alert it warrants, if any.
    ///
    /// The whole read-decide-write sequence runs under the state lock.
    pub fn observe_at(
        &self,
        key: &ServiceKey,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let policy = self.policy();
        let mut states = self.lock();

        let Some(state) = states.get_mut(key) else {
            trace!("{}: baseline {}", key, outcome.status);
            states.insert(key.clone(), ServiceState::baseline(outcome.status, now));
            return None;
        };

        let previous = state.last_status;
        let finished_run = state.failure_count;
        let kind = match transition(Some(previous), outcome.status) {
            Transition::Baseline | Transition::Steady => None,
            Transition::WentDown => {
                state.failure_count = 1;
                state.first_fail = Some(now);
                Some(AlertKind::Down)
            }
            Transition::StillDown => {
                state.failure_count = state.failure_count.saturating_add(1);
                (state.failure_count == policy.failure_threshold)
                    .then_some(AlertKind::ContinuousDown)
            }
            Transition::Recovered => {
                state.failure_count = 0;
                state.first_fail = None;
                Some(AlertKind::Up)
            }
        };
        state.last_status = outcome.status;

        let kind = kind?;
        if state.in_cooldown(now, policy.min_notify_interval) {
            debug!("{}: {} alert suppressed by cooldown", key, kind);
            return None;
        }
        state.last_notify = Some(now);

        let failure_count = match kind {
            AlertKind::Up => finished_run,
            AlertKind::Down | AlertKind::ContinuousDown => state.failure_count,
        };

        Some(Alert {
            key: key.clone(),
            kind,
            previous,
            current: outcome.status,
            sub_status: outcome.sub_status,
            latency_ms: outcome.latency_ms,
            timestamp: outcome.timestamp,
            failure_count,
            down_since: state.first_fail.map(|t| t.timestamp()),
        })
    }

    /// Drop idle, healthy series whose last alert is older than `horizon`.
    /// Series in a failing run are always kept.
    pub fn evict_idle(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let mut states = self.lock();
        let before = states.len();
        states.retain(|_, state| {
            let stale = state.last_notify.is_some_and(|last| {
                (now - last)
                    .to_std()
                    .is_ok_and(|elapsed| elapsed > horizon)
            });
            !(stale && state.last_status.is_up())
        });
        before - states.len()
    }

    pub fn state(&self, key: &ServiceKey) -> Option<ServiceState> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceKey, ServiceState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
