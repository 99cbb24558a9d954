//! Round-based probing scheduler
//!
//! A single controller task owns the round lifecycle. Timer ticks, manual
//! triggers and reload triggers all arrive at the controller, which starts a
//! round only if none is in flight; overlapping requests are dropped, not
//! queued.
//!
//! ## Message Flow
//!
//! ```text
//! ticker ─────────┐
//! TriggerNow ─────┼──► controller ──► round (one task per monitor)
//! Reschedule ─────┘        │              │
//!                          │              ├─ stagger sleep (cancelable)
//!     shutdown token ──────┘              ├─ semaphore permit (cancelable)
//!                                         ├─ probe (cancelable)
//!                                         └─ save + alert dispatch
//! ```
//!
//! A round reads the config snapshot once when it starts and passes it down;
//! a reload mid-round only affects the next round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::AlertDispatcher;
use crate::config::{AppConfig, ServiceConfig};
use crate::probe::Prober;
use crate::storage::ProbeStore;

/// Slots used when `max_concurrency` is left at 0
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Collaborators a round hands its work to.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub prober: Arc<dyn Prober>,
    pub store: Arc<dyn ProbeStore>,
    pub alerts: Option<Arc<AlertDispatcher>>,
}

#[derive(Debug)]
enum SchedulerCommand {
    TriggerNow,
    Reschedule(Duration),
}

#[derive(Debug, Default)]
struct Counters {
    rounds_started: AtomicU64,
    rounds_skipped: AtomicU64,
    rounds_completed: AtomicU64,
    probes_completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub rounds_started: u64,
    pub rounds_skipped: u64,
    pub rounds_completed: u64,
    pub probes_completed: u64,
}

/// Number of probe slots for a round of `services` monitors.
///
/// `-1` gives every monitor its own slot, `0` selects [`DEFAULT_CONCURRENCY`],
/// anything positive is a hard cap.
pub fn concurrency_limit(max_concurrency: i32, services: usize) -> usize {
    match max_concurrency {
        -1 => services.max(1),
        n if n <= 0 => DEFAULT_CONCURRENCY,
        n => n as usize,
    }
}

/// Start delay of each task in a staggered round.
///
/// Task `i` waits `base * i` with `base = cadence / services`, shifted by a
/// uniform jitter of up to `base / 5` either way and clamped at zero.
pub fn stagger_delays(services: usize, cadence: Duration, rng: &mut impl Rng) -> Vec<Duration> {
    if services == 0 {
        return vec![];
    }

    let base = cadence.as_nanos() as f64 / services as f64;
    let spread = base / 5.0;

    (0..services)
        .map(|idx| {
            let jitter = if spread > 0.0 {
                rng.random_range(-spread..=spread)
            } else {
                0.0
            };
            let nanos = (base * idx as f64 + jitter).max(0.0);
            Duration::from_nanos(nanos as u64)
        })
        .collect()
}

struct Controller {
    deps: SchedulerDeps,
    config: Arc<RwLock<Arc<AppConfig>>>,
    cadence: Duration,
    counters: Arc<Counters>,
    receiver: mpsc::Receiver<SchedulerCommand>,
    shutdown: CancellationToken,
    current: Option<JoinHandle<()>>,
}

fn ticker(cadence: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

impl Controller {
    async fn run(mut self) {
        info!("scheduler started with cadence {:?}", self.cadence);

        // fast first signal: immediate and unstaggered
        self.request_round(false, "startup");
        let mut ticker = ticker(self.cadence);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.receiver.recv() => match command {
                    Some(SchedulerCommand::TriggerNow) => self.request_round(false, "trigger"),
                    Some(SchedulerCommand::Reschedule(cadence)) => {
                        if cadence != self.cadence {
                            info!("cadence changed {:?} → {:?}", self.cadence, cadence);
                            self.cadence = cadence;
                            ticker = self::ticker(cadence);
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.request_round(true, "tick"),
            }
        }

        if let Some(round) = self.current.take() {
            debug!("waiting for in-flight round to wind down");
            if let Err(e) = round.await {
                error!("round task failed: {}", e);
            }
        }
        info!("scheduler stopped");
    }

    fn request_round(&mut self, stagger_allowed: bool, trigger: &str) {
        if self.current.as_ref().is_some_and(|round| !round.is_finished()) {
            self.counters.rounds_skipped.fetch_add(1, Ordering::Relaxed);
            warn!("{} round skipped: previous round still running", trigger);
            return;
        }

        let snapshot = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let services = snapshot.monitors.len();
        if services == 0 {
            debug!("{} round skipped: no monitors configured", trigger);
            return;
        }

        let stagger =
            stagger_allowed && snapshot.stagger_probes && services > 1 && !self.cadence.is_zero();
        let delays = if stagger {
            stagger_delays(services, self.cadence, &mut rand::rng())
        } else {
            vec![Duration::ZERO; services]
        };

        let round = self.counters.rounds_started.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "round {} ({}) started: {} monitors, stagger {}",
            round, trigger, services, stagger
        );

        self.current = Some(tokio::spawn(run_round(
            round,
            snapshot,
            delays,
            self.deps.clone(),
            self.counters.clone(),
            self.shutdown.clone(),
        )));
    }
}

async fn run_round(
    round: u64,
    config: Arc<AppConfig>,
    delays: Vec<Duration>,
    deps: SchedulerDeps,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    let started = Instant::now();
    let slots = concurrency_limit(config.max_concurrency, config.monitors.len());
    let semaphore = Arc::new(Semaphore::new(slots));

    let mut tasks = JoinSet::new();
    for (service, delay) in config.monitors.iter().zip(delays) {
        tasks.spawn(probe_task(
            service.clone(),
            delay,
            deps.clone(),
            semaphore.clone(),
            counters.clone(),
            shutdown.clone(),
        ));
    }

    // tasks watch the token themselves, so draining also covers cancellation
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("probe task of round {} failed: {}", round, e);
        }
    }

    counters.rounds_completed.fetch_add(1, Ordering::Relaxed);
    if shutdown.is_cancelled() {
        info!("round {} cancelled after {:?}", round, started.elapsed());
    } else {
        info!("round {} finished in {:?}", round, started.elapsed());
    }
}

#[instrument(skip_all, fields(key = %service.key()))]
async fn probe_task(
    service: ServiceConfig,
    delay: Duration,
    deps: SchedulerDeps,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    if !delay.is_zero() {
        trace!("staggered by {:?}", delay);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = time::sleep(delay) => {}
        }
    }

    let permit = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    // a slot freed by an abandoned probe must not start a new one
    if shutdown.is_cancelled() {
        return;
    }

    let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            debug!("probe abandoned at shutdown");
            return;
        }
        outcome = deps.prober.probe(&service) => outcome,
    };
    drop(permit);
    counters.probes_completed.fetch_add(1, Ordering::Relaxed);

    let key = service.key();
    match deps.store.save(&key, &outcome).await {
        Ok(id) => trace!("saved probe record {}", id),
        Err(e) => error!("{}: failed to persist probe outcome: {}", key, e),
    }

    if let Some(alerts) = &deps.alerts {
        alerts.observe(&key, &outcome);
    }
}

/// Control surface of a running scheduler.
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    config: Arc<RwLock<Arc<AppConfig>>>,
    cadence: Mutex<Duration>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    prober: Arc<dyn Prober>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    /// Spawn the controller. The first round starts immediately.
    ///
    /// The scheduler stops when `shutdown` (or the handle's own child of it)
    /// is cancelled.
    pub fn start(
        deps: SchedulerDeps,
        config: Arc<AppConfig>,
        cadence: Duration,
        shutdown: &CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(16);
        let config = Arc::new(RwLock::new(config));
        let counters = Arc::new(Counters::default());
        let shutdown = shutdown.child_token();
        let prober = deps.prober.clone();

        let controller = Controller {
            deps,
            config: config.clone(),
            cadence,
            counters: counters.clone(),
            receiver,
            shutdown: shutdown.clone(),
            current: None,
        };
        let task = tokio::spawn(controller.run());

        Self {
            sender,
            config,
            cadence: Mutex::new(cadence),
            counters,
            shutdown,
            prober,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    /// Current config snapshot.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the snapshot used by the next round; resets the timer if the
    /// interval changed. A round in flight keeps its own snapshot.
    pub async fn update_config(&self, config: Arc<AppConfig>) -> anyhow::Result<()> {
        let cadence = config.cadence();
        anyhow::ensure!(!cadence.is_zero(), "probe interval must be positive");
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        debug!("scheduler config swapped");
        self.set_cadence(cadence).await
    }

    /// Reset the periodic timer to `cadence` if it differs from the current one.
    pub async fn set_cadence(&self, cadence: Duration) -> anyhow::Result<()> {
        anyhow::ensure!(!cadence.is_zero(), "probe interval must be positive");
        {
            let mut current = self.cadence.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == cadence {
                return Ok(());
            }
            *current = cadence;
        }
        self.sender
            .send(SchedulerCommand::Reschedule(cadence))
            .await
            .context("scheduler is not running")
    }

    /// Request an immediate, unstaggered round. Dropped if one is running.
    pub async fn trigger_now(&self) -> anyhow::Result<()> {
        self.sender
            .send(SchedulerCommand::TriggerNow)
            .await
            .context("scheduler is not running")
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            rounds_started: self.counters.rounds_started.load(Ordering::Relaxed),
            rounds_skipped: self.counters.rounds_skipped.load(Ordering::Relaxed),
            rounds_completed: self.counters.rounds_completed.load(Ordering::Relaxed),
            probes_completed: self.counters.probes_completed.load(Ordering::Relaxed),
        }
    }

    /// Cancel the timer and any in-flight round, then release the prober.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                error!("scheduler task failed: {}", e);
            }
            self.prober.close().await;
        }
    }
}
