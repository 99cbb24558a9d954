//! Config file hot reload
//!
//! Watches the directory holding the config file (editors often replace the
//! file instead of writing it in place) and re-loads it after a short quiet
//! period. A snapshot that fails to load is logged and dropped; the receiver
//! only ever sees fully validated configs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// Start watching. Every valid reload is sent on the returned channel
    /// until `shutdown` is cancelled.
    pub fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> notify::Result<mpsc::Receiver<Arc<AppConfig>>> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<()>(16);
        let file_name: Option<OsString> = self.path.file_name().map(ToOwned::to_owned);

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if ours {
                        // a full channel already has a reload pending
                        let _ = raw_tx.try_send(());
                    }
                }
                Err(e) => warn!("config watch error: {}", e),
            })?;
        watcher.watch(self.directory(), RecursiveMode::NonRecursive)?;
        info!("watching {} for changes", self.path.display());

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _watcher = watcher;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = raw_rx.recv() => if event.is_none() { break },
                }

                // let the burst of events from one save settle
                time::sleep(self.debounce).await;
                while raw_rx.try_recv().is_ok() {}

                match AppConfig::load(&self.path) {
                    Ok(config) => {
                        info!(
                            "config reloaded: {} monitors, interval {}s",
                            config.monitors.len(),
                            config.interval
                        );
                        if tx.send(Arc::new(config)).await.is_err() {
                            debug!("reload receiver dropped, stopping watcher");
                            break;
                        }
                    }
                    Err(e) => error!("config reload rejected, keeping current config: {}", e),
                }
            }
            debug!("config watcher stopped");
        });

        Ok(rx)
    }
}
