//! Probe store trait definition

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::ProbeRecord;
use crate::config::ChannelMapping;
use crate::{ProbeOutcome, ServiceKey};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Append-only store of probe outcomes.
///
/// Implementations must be safe for concurrent use: the scheduler writes from
/// many round tasks while queries read independently.
#[async_trait]
pub trait ProbeStore: Send + Sync {
    /// Persist one outcome and return its storage identity.
    async fn save(&self, key: &ServiceKey, outcome: &ProbeOutcome) -> StorageResult<i64>;

    /// Most recent record of a series, `None` if it has no records.
    async fn latest(&self, key: &ServiceKey) -> StorageResult<Option<ProbeRecord>>;

    /// Records of a series with `timestamp >= since`, oldest first.
    async fn history(&self, key: &ServiceKey, since: i64) -> StorageResult<Vec<ProbeRecord>>;

    /// Delete records older than `older_than_days` days. Returns the number deleted.
    async fn cleanup(&self, older_than_days: u32) -> StorageResult<u64>;

    /// Backfill the channel of legacy rows that were written without one.
    ///
    /// Idempotent: once no row with an empty channel matches a mapping,
    /// this is a no-op returning 0.
    async fn migrate_channels(&self, mappings: &[ChannelMapping]) -> StorageResult<u64>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

pub(crate) fn cutoff_timestamp(now: i64, older_than_days: u32) -> i64 {
    now - i64::from(older_than_days) * 86_400
}
