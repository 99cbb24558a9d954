//! Storage backends for probe history
//!
//! ## Design
//!
//! - **Trait-based**: `ProbeStore` allows swapping implementations
//! - **Append-only**: one row per completed probe, never mutated except by
//!   the one-time channel backfill
//! - **Retention**: a background task deletes old rows once a day
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory**: No persistence, for `backend: "none"` and tests
//!
//! ## Usage
//!
//! ```no_run
//! use relay_pulse::storage::{ProbeStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./monitor.db").await?;
//!     store.cleanup(30).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

pub use backend::{HealthStatus, ProbeStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::ProbeRecord;

use crate::config::StorageConfig;

/// Retention cleanup runs once a day
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Open the backend selected by `config`.
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn ProbeStore>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory probe store (no persistence)");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "sqlite support is not compiled in".to_string(),
        )),
    }
}

/// Delete records older than `retention_days` now and then once per day,
/// until `shutdown` is cancelled.
pub fn spawn_retention_task(
    store: Arc<dyn ProbeStore>,
    retention_days: u32,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    spawn_retention_task_every(store, retention_days, CLEANUP_INTERVAL, shutdown)
}

pub(crate) fn spawn_retention_task_every(
    store: Arc<dyn ProbeStore>,
    retention_days: u32,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("retention task stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match store.cleanup(retention_days).await {
                        Ok(0) => trace!("retention cleanup: nothing to delete"),
                        Ok(deleted) => info!(
                            "retention cleanup complete: deleted {} records older than {} days",
                            deleted, retention_days
                        ),
                        Err(e) => error!("failed to clean up old probe records: {}", e),
                    }
                }
            }
        }
    })
}
