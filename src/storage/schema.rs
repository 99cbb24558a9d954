//! Probe record definitions shared by all backends
//!
//! Each completed probe becomes one append-only row:
//!
//! | column     | meaning                                      |
//! |------------|----------------------------------------------|
//! | id         | storage-assigned identity                    |
//! | provider   | series provider                              |
//! | service    | series service                               |
//! | channel    | series channel (empty for legacy rows)       |
//! | status     | 0 unavailable, 1 available, 2 degraded       |
//! | sub_status | refinement name, empty when none             |
//! | latency    | milliseconds                                 |
//! | timestamp  | epoch seconds                                |

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::{ProbeOutcome, ProbeStatus, ServiceKey, SubStatus};

/// A persisted probe outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub id: i64,
    pub key: ServiceKey,
    pub outcome: ProbeOutcome,
}

impl ProbeRecord {
    /// Rebuild a record from raw column values.
    #[allow(clippy::too_many_arguments)]
    pub fn from_columns(
        id: i64,
        provider: String,
        service: String,
        channel: String,
        status: i64,
        sub_status: &str,
        latency: i64,
        timestamp: i64,
    ) -> StorageResult<Self> {
        let status = u8::try_from(status)
            .map_err(|_| StorageError::SerializationError(format!("status {status}")))
            .and_then(|s| ProbeStatus::try_from(s).map_err(StorageError::SerializationError))?;
        let sub_status = sub_status
            .parse::<SubStatus>()
            .map_err(StorageError::SerializationError)?;

        Ok(Self {
            id,
            key: ServiceKey::new(provider, service, channel),
            outcome: ProbeOutcome {
                status,
                sub_status,
                latency_ms: latency.max(0) as u64,
                timestamp,
            },
        })
    }

    pub fn timestamp(&self) -> i64 {
        self.outcome.timestamp
    }
}
