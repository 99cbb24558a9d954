//! In-memory storage backend (no persistence)
//!
//! Used when `storage.backend` is `"none"` and throughout the tests.
//! All data is lost on restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, ProbeStore, cutoff_timestamp};
use super::error::{StorageError, StorageResult};
use super::schema::ProbeRecord;
use crate::config::ChannelMapping;
use crate::{ProbeOutcome, ServiceKey};

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<ProbeRecord>>,
    next_id: AtomicI64,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is; lets tests seed legacy rows.
    pub async fn insert(&self, key: ServiceKey, outcome: ProbeOutcome) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.records
            .write()
            .await
            .push(ProbeRecord { id, key, outcome });
        id
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ProbeStore for MemoryStore {
    async fn save(&self, key: &ServiceKey, outcome: &ProbeOutcome) -> StorageResult<i64> {
        self.ensure_open()?;
        Ok(self.insert(key.clone(), *outcome).await)
    }

    async fn latest(&self, key: &ServiceKey) -> StorageResult<Option<ProbeRecord>> {
        self.ensure_open()?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| &r.key == key)
            .max_by_key(|r| (r.outcome.timestamp, r.id))
            .cloned())
    }

    async fn history(&self, key: &ServiceKey, since: i64) -> StorageResult<Vec<ProbeRecord>> {
        self.ensure_open()?;
        let records = self.records.read().await;
        let mut history: Vec<ProbeRecord> = records
            .iter()
            .filter(|r| &r.key == key && r.outcome.timestamp >= since)
            .cloned()
            .collect();
        history.sort_by_key(|r| (r.outcome.timestamp, r.id));
        Ok(history)
    }

    async fn cleanup(&self, older_than_days: u32) -> StorageResult<u64> {
        self.ensure_open()?;
        let cutoff = cutoff_timestamp(Utc::now().timestamp(), older_than_days);
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.outcome.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn migrate_channels(&self, mappings: &[ChannelMapping]) -> StorageResult<u64> {
        self.ensure_open()?;
        let mut records = self.records.write().await;
        let mut updated = 0;
        for record in records.iter_mut().filter(|r| r.key.channel.is_empty()) {
            if let Some(mapping) = mappings
                .iter()
                .find(|m| m.provider == record.key.provider && m.service == record.key.service)
            {
                record.key.channel = mapping.channel.clone();
                updated += 1;
            }
        }
        debug!("in-memory channel migration updated {} records", updated);
        Ok(updated)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.ensure_open()?;
        let total = self.records.read().await.len();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("records".to_string(), total.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
